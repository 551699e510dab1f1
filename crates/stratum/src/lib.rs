use {
    rand::RngCore,
    serde::{
        Deserialize, Serialize, Serializer,
        de::{self, Deserializer},
        ser::{SerializeMap, SerializeSeq},
    },
    serde_json::{Number, Value},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    snafu::Snafu,
    std::{
        fmt::{self, Formatter},
        num::ParseIntError,
        ops::{BitAnd, BitOr, Not},
        str::FromStr,
    },
};

pub use {
    authorize::Authorize,
    configure::ConfigureResult,
    difficulty::Difficulty,
    error::{JsonRpcError, StratumError},
    extranonce::Extranonce,
    job_id::JobId,
    message::{Id, Message},
    notify::Notify,
    set_difficulty::SetDifficulty,
    submit::Submit,
    subscribe::SubscribeResult,
    version::Version,
};

mod authorize;
mod configure;
mod difficulty;
mod error;
mod extranonce;
mod job_id;
mod message;
mod notify;
mod set_difficulty;
mod submit;
mod subscribe;
mod version;

/// Version rolling mask advertised in response to `mining.configure` and
/// `mining.multi_version`.
pub const VERSION_ROLLING_MASK: Version = Version(0x1fffe000);

#[cfg(test)]
use {pretty_assertions::assert_eq as pretty_assert_eq, serde_json::json};
