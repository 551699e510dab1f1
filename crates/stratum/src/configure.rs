use super::*;

/// Result of `mining.configure`. Only version rolling is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfigureResult {
    #[serde(rename = "version-rolling")]
    pub version_rolling: bool,
    #[serde(rename = "version-rolling.mask")]
    pub version_rolling_mask: Version,
}
