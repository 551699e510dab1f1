use super::*;

/// The `[code, message, data]` error tuple carried in a response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub error_code: i32,
    pub message: String,
    pub traceback: Option<Value>,
}

impl Serialize for JsonRpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (&self.error_code, &self.message, &self.traceback).serialize(serializer)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Stratum error {}: {}", self.error_code, self.message)
    }
}

/// Reasons a share or a mining request is refused. The wire code groups them:
/// 20 malformed or unsupported, 21 stale job, 22 duplicate, 23 low difficulty,
/// 24 unauthorized and 25 unsubscribed.
#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum StratumError {
    #[snafu(display("incorrect size of extranonce2"))]
    IncorrectExtranonce2Size,
    #[snafu(display("incorrect size of ntime"))]
    IncorrectNtimeSize,
    #[snafu(display("ntime out of range"))]
    NtimeOutOfRange,
    #[snafu(display("incorrect size of nonce"))]
    IncorrectNonceSize,
    #[snafu(display("worker address isn't set properly"))]
    WorkerAddressUnset,
    #[snafu(display("invalid version bit"))]
    InvalidVersionBit,
    #[snafu(display("malformed submission"))]
    MalformedSubmission,
    #[snafu(display("Not supported."))]
    NotSupported,
    #[snafu(display("job not found"))]
    JobNotFound,
    #[snafu(display("duplicate share"))]
    DuplicateShare,
    #[snafu(display("low difficulty share of {share_difficulty}"))]
    LowDifficultyShare { share_difficulty: f64 },
    #[snafu(display("unauthorized worker"))]
    UnauthorizedWorker,
    #[snafu(display("not subscribed"))]
    NotSubscribed,
}

impl StratumError {
    pub fn code(&self) -> i32 {
        match self {
            Self::IncorrectExtranonce2Size
            | Self::IncorrectNtimeSize
            | Self::NtimeOutOfRange
            | Self::IncorrectNonceSize
            | Self::WorkerAddressUnset
            | Self::InvalidVersionBit
            | Self::MalformedSubmission
            | Self::NotSupported => 20,
            Self::JobNotFound => 21,
            Self::DuplicateShare => 22,
            Self::LowDifficultyShare { .. } => 23,
            Self::UnauthorizedWorker => 24,
            Self::NotSubscribed => 25,
        }
    }

    pub fn into_response(self) -> JsonRpcError {
        JsonRpcError {
            error_code: self.code(),
            message: self.to_string(),
            traceback: None,
        }
    }
}

impl From<StratumError> for JsonRpcError {
    fn from(error: StratumError) -> Self {
        error.into_response()
    }
}
