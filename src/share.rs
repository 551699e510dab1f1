use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    #[display("share")]
    Share,
    #[display("primary")]
    Primary,
    #[display("auxiliary")]
    Auxiliary,
}

/// The fields of a `mining.submit` together with the session state needed to
/// rebuild the header.
#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub(crate) extranonce1: Extranonce,
    pub(crate) extranonce2: String,
    pub(crate) ntime: String,
    pub(crate) nonce: String,
    pub(crate) version_bits: Option<String>,
    pub(crate) asicboost: bool,
    pub(crate) version_mask: Version,
}

#[derive(Debug, Clone)]
pub(crate) struct ShareRequest {
    pub(crate) job_id: String,
    pub(crate) previous_difficulty: Option<f64>,
    pub(crate) difficulty: f64,
    pub(crate) ip: IpAddr,
    pub(crate) port: u16,
    pub(crate) addr_primary: Option<String>,
    pub(crate) addr_auxiliary: Option<String>,
    pub(crate) submission: Submission,
}

/// Everything known about a share that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub block_type: BlockType,
    pub block_diff_primary: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_diff_auxiliary: Option<f64>,
    pub coinbase: String,
    pub hash: String,
    pub hex: String,
    pub header: String,
    pub header_diff: String,
    pub height: u64,
    pub reward: u64,
    pub share_diff: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux_pow: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShareResult {
    Valid(Accepted),
    Invalid { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareEvent {
    pub job: String,
    pub ip: IpAddr,
    pub port: u16,
    pub addr_primary: Option<String>,
    pub addr_auxiliary: Option<String>,
    pub difficulty: f64,
    pub identifier: String,
    #[serde(flatten)]
    pub result: ShareResult,
}

impl ShareEvent {
    pub fn accepted(&self) -> Option<&Accepted> {
        match &self.result {
            ShareResult::Valid(accepted) => Some(accepted),
            ShareResult::Invalid { .. } => None,
        }
    }
}

/// Outcome of a valid submission: the difficulty it was credited at, the
/// primary share and, when it also solves the aux chain, the aux candidate.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Verdict {
    pub(crate) difficulty: f64,
    pub(crate) share: Accepted,
    pub(crate) auxiliary: Option<Accepted>,
}
