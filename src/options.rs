use super::*;

#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
    #[arg(long, env = "STRATAPOOL_CONFIG", help = "Load configuration from <CONFIG>.")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "STRATAPOOL_HOST", help = "Listen for miners on <HOST>.")]
    pub host: Option<String>,

    #[arg(
        long,
        env = "STRATAPOOL_ADDRESS",
        help = "Pay the pool share of block rewards to <ADDRESS>."
    )]
    pub address: Option<String>,

    #[arg(
        long,
        env = "STRATAPOOL_DAEMON_URL",
        help = "Request block templates from the daemon at <DAEMON_URL>."
    )]
    pub daemon_url: Option<String>,

    #[arg(
        long,
        env = "STRATAPOOL_DAEMON_USERNAME",
        help = "Authenticate to the daemon as <DAEMON_USERNAME>."
    )]
    pub daemon_username: Option<String>,

    #[arg(
        long,
        env = "STRATAPOOL_DAEMON_PASSWORD",
        help = "Authenticate to the daemon with <DAEMON_PASSWORD>."
    )]
    pub daemon_password: Option<String>,
}
