use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Mediatek,
    Samsung,
    Xiaomi,
    Huawei,
    Generic,
}

impl Vendor {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mediatek" | "mtk" => Some(Vendor::Mediatek),
            "samsung" => Some(Vendor::Samsung),
            "xiaomi" | "redmi" | "poco" => Some(Vendor::Xiaomi),
            "huawei" | "honor" => Some(Vendor::Huawei),
            "generic" | "android" => Some(Vendor::Generic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Mediatek => "mediatek",
            Vendor::Samsung => "samsung",
            Vendor::Xiaomi => "xiaomi",
            Vendor::Huawei => "huawei",
            Vendor::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPoint {
    /// `am start -n <component>`
    Activity(String),
    /// Dialer secret code delivered as a `SECRET_CODE` broadcast.
    SecretCode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineeringMode {
    pub vendor: Vendor,
    pub name: &'static str,
    pub entry: EntryPoint,
}

impl EntryPoint {
    pub fn shell_command(&self) -> String {
        match self {
            EntryPoint::Activity(component) => format!("am start -n {component}"),
            EntryPoint::SecretCode(code) => format!(
                "am broadcast -a android.provider.Telephony.SECRET_CODE -d android_secret_code://{code}"
            ),
        }
    }
}

/// Entry points tried in order for each vendor. The generic testing menu closes every list.
pub fn modes_for(vendor: Vendor) -> Vec<EngineeringMode> {
    let mode = |vendor, name, entry| EngineeringMode {
        vendor,
        name,
        entry,
    };
    let mut modes = match vendor {
        Vendor::Mediatek => vec![
            mode(
                Vendor::Mediatek,
                "MTK Engineer Mode",
                EntryPoint::Activity("com.mediatek.engineermode/.EngineerMode".to_string()),
            ),
            mode(
                Vendor::Mediatek,
                "MTK Engineer Mode (secret code)",
                EntryPoint::SecretCode("3646633".to_string()),
            ),
        ],
        Vendor::Samsung => vec![mode(
            Vendor::Samsung,
            "Samsung Service Mode",
            EntryPoint::SecretCode("0011".to_string()),
        )],
        Vendor::Xiaomi => vec![mode(
            Vendor::Xiaomi,
            "Xiaomi CIT",
            EntryPoint::SecretCode("6484".to_string()),
        )],
        Vendor::Huawei => vec![mode(
            Vendor::Huawei,
            "Huawei Project Menu",
            EntryPoint::SecretCode("2846579".to_string()),
        )],
        Vendor::Generic => Vec::new(),
    };
    modes.push(mode(
        Vendor::Generic,
        "Testing Menu",
        EntryPoint::SecretCode("4636".to_string()),
    ));
    modes
}

/// Vendor from `ro.hardware` / `ro.board.platform` (MediaTek SoCs report `mt*`) and then
/// from manufacturer or brand.
pub fn detect_vendor(props: &HashMap<String, String>) -> Vendor {
    let prop = |key: &str| props.get(key).map(|value| value.to_lowercase()).unwrap_or_default();
    let platform = prop("ro.board.platform");
    let hardware = prop("ro.hardware");
    if platform.starts_with("mt") || hardware.starts_with("mt") {
        return Vendor::Mediatek;
    }
    for key in ["ro.product.manufacturer", "ro.product.brand"] {
        if let Some(vendor) = Vendor::parse(&prop(key)).filter(|v| *v != Vendor::Generic) {
            return vendor;
        }
    }
    Vendor::Generic
}

/// `am` reports a missing component on stdout with exit code 0.
pub fn launch_failed(output: &str) -> bool {
    output.contains("Error:") || output.contains("does not exist")
}
