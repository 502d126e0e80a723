use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Counting semaphore bounding how many workers run at once.
pub struct GlobalSemaphore {
    limit: usize,
    used: Mutex<usize>,
    cv: Condvar,
}

impl GlobalSemaphore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            used: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_use(&self) -> usize {
        *self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(self: &Arc<Self>) -> GlobalPermit {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        while *used >= self.limit {
            used = self.cv.wait(used).unwrap_or_else(PoisonError::into_inner);
        }
        *used += 1;
        GlobalPermit {
            semaphore: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut used = self.used.lock().unwrap_or_else(PoisonError::into_inner);
        *used = used.saturating_sub(1);
        self.cv.notify_one();
    }
}

pub struct GlobalPermit {
    semaphore: Arc<GlobalSemaphore>,
}

impl Drop for GlobalPermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Global concurrency limit plus one lock per device serial, so two workers never drive the
/// same device at the same time.
pub struct TaskScheduler {
    global: Arc<GlobalSemaphore>,
    device_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskScheduler {
    pub fn new(global_limit: usize) -> Self {
        Self {
            global: Arc::new(GlobalSemaphore::new(global_limit)),
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn global(&self) -> &Arc<GlobalSemaphore> {
        &self.global
    }

    pub fn acquire_global(&self) -> GlobalPermit {
        self.global.acquire()
    }

    pub fn device_lock(&self, serial: &str) -> Arc<Mutex<()>> {
        let mut guard = self
            .device_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            guard
                .entry(serial.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Runs `work` holding a global permit and, when a serial is given, that device's lock.
    pub fn run_exclusive<T>(&self, serial: Option<&str>, work: impl FnOnce() -> T) -> T {
        let _permit = self.acquire_global();
        match serial.filter(|value| !value.trim().is_empty()) {
            Some(serial) => {
                let lock = self.device_lock(serial);
                let _guard: MutexGuard<'_, ()> =
                    lock.lock().unwrap_or_else(PoisonError::into_inner);
                work()
            }
            None => work(),
        }
    }
}
