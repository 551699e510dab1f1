use {
    anyhow::{Context, Error, anyhow, bail, ensure},
    arguments::Arguments,
    async_trait::async_trait,
    bitcoin::{
        Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, base58,
        consensus,
        hashes::Hash,
        locktime::absolute::LockTime,
        transaction,
    },
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    clap::{Parser, ValueEnum},
    coinbase_builder::CoinbaseBuilder,
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    job::Job,
    jobs::Jobs,
    parking_lot::{Mutex, RwLock},
    primitive_types::U256,
    primitives::{
        DIFFICULTY_1, address_to_script, aux_merkle_position, difficulty_from_target,
        merkle_root_from_steps, merkle_steps, reverse_byte_order, round_to, serialize_number,
        sha256d, target_from_bits, u256_to_f64, uint256_from_hash, unix_now, var_int,
    },
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    session::SessionId,
    share::{ShareRequest, Submission, Verdict},
    std::{
        collections::{HashMap, HashSet, VecDeque},
        env,
        fmt::{self, Display, Formatter},
        fs, io, iter,
        net::{IpAddr, SocketAddr},
        path::{Path, PathBuf},
        process,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    stratum::{
        Authorize, ConfigureResult, Difficulty, Extranonce, Id, JobId, JsonRpcError, Message,
        Notify, SetDifficulty, StratumError, Submit, SubscribeResult, VERSION_ROLLING_MASK,
        Version,
    },
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::{TcpListener, TcpStream},
        runtime::Runtime,
        sync::{mpsc, watch},
        task::JoinSet,
        time::{MissedTickBehavior, interval, sleep, sleep_until, timeout},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt},
    vardiff::Vardiff,
};

pub use {
    authorizer::{Authorization, Authorizer},
    block_template::{AuxBlock, BlockTemplate, CoinbaseAux, CoinbaseTxn, TemplateTransaction},
    chain::Chain,
    coinbase_builder::{Payout, Recipient},
    events::{
        BlockEvent, ClientEvent, ClientEventKind, Event, EventSender, FileFormat, NewJobEvent,
    },
    extranonces::Extranonces,
    options::Options,
    pool::Pool,
    registry::Registry,
    settings::{
        AuxiliarySettings, BanSettings, DaemonSettings, DifficultySettings, EventsSettings,
        PollingSettings, PortSettings, RecipientSettings, Settings, TimeoutSettings, TlsSettings,
    },
    share::{Accepted, BlockType, ShareEvent, ShareResult},
    validator::Validator,
};

#[cfg(test)]
use pretty_assertions::assert_eq as pretty_assert_eq;

mod arguments;
mod authorizer;
mod bans;
mod block_template;
mod chain;
mod coinbase_builder;
mod daemon;
mod events;
mod extranonces;
mod job;
mod jobs;
mod logs;
mod options;
mod pool;
mod primitives;
mod registry;
mod session;
mod settings;
mod share;
mod signal;
mod validator;
mod vardiff;

/// Bytes reserved in the coinbase for extranonce1 and extranonce2 together.
pub const EXTRANONCE_PLACEHOLDER_SIZE: usize = 8;
pub const EXTRANONCE1_SIZE: usize = 4;
pub const MIN_EXTRANONCE_SIZE: usize = 2;
/// Max ntime forward roll in seconds.
pub const MAX_NTIME_OFFSET: u64 = 7200;
/// Longest accepted stratum line. Longer lines count as flooding.
pub const MAX_MESSAGE_SIZE: usize = 10240;

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn main() {
    let _guard = logs::init();

    let args = Arguments::parse();

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to create tokio runtime: {err}");
            process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        let cancel_token = signal::setup_signal_handler()?;
        args.run(cancel_token).await
    });

    if let Err(err) = result {
        eprintln!("error: {err}");

        for (i, cause) in err.chain().skip(1).enumerate() {
            if i == 0 {
                eprintln!();
                eprintln!("because:");
            }
            eprintln!("- {cause}");
        }

        if env::var_os("RUST_BACKTRACE")
            .map(|val| val == "1")
            .unwrap_or_default()
        {
            eprintln!();
            eprintln!("{}", err.backtrace());
        }

        process::exit(1);
    }
}
