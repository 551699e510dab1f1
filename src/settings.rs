use {super::*, options::Options};

/// Pool configuration as read from the TOML file, with command line
/// overrides applied on top.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub identifier: String,
    pub address: Option<String>,
    pub host: String,
    pub chain: Chain,
    pub coinbase_tag: Option<String>,
    pub recipients: Vec<RecipientSettings>,
    pub daemon: DaemonSettings,
    pub auxiliary: Option<AuxiliarySettings>,
    pub ports: Vec<PortSettings>,
    pub banning: BanSettings,
    pub timeouts: TimeoutSettings,
    pub polling: PollingSettings,
    pub tls: Option<TlsSettings>,
    pub events: Option<EventsSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            identifier: "stratapool".into(),
            address: None,
            host: "0.0.0.0".into(),
            chain: Chain::default(),
            coinbase_tag: None,
            recipients: Vec::new(),
            daemon: DaemonSettings::default(),
            auxiliary: None,
            ports: vec![PortSettings::default()],
            banning: BanSettings::default(),
            timeouts: TimeoutSettings::default(),
            polling: PollingSettings::default(),
            tls: None,
            events: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecipientSettings {
    pub address: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".into(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 10,
        }
    }
}

impl DaemonSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuxiliarySettings {
    pub enabled: bool,
    pub daemon: DaemonSettings,
    /// Merge-mining magic bytes, hex encoded.
    pub header: String,
}

impl Default for AuxiliarySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            daemon: DaemonSettings::default(),
            header: "fabe6d6d".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortSettings {
    pub port: u16,
    pub enabled: bool,
    pub tls: bool,
    pub difficulty: DifficultySettings,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            port: 3002,
            enabled: true,
            tls: false,
            difficulty: DifficultySettings::default(),
        }
    }
}

/// Vardiff parameters for one port. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DifficultySettings {
    pub initial: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub target_time: f64,
    pub retarget_time: f64,
    pub variance: f64,
}

impl Default for DifficultySettings {
    fn default() -> Self {
        Self {
            initial: 32.0,
            minimum: 8.0,
            maximum: 512.0,
            target_time: 15.0,
            retarget_time: 90.0,
            variance: 0.3,
        }
    }
}

impl DifficultySettings {
    pub fn retarget(&self) -> Duration {
        Duration::from_secs_f64(self.retarget_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BanSettings {
    pub enabled: bool,
    pub ban_length_secs: u64,
    pub check_threshold: u32,
    pub invalid_percent: f64,
    pub purge_interval_secs: u64,
}

impl Default for BanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ban_length_secs: 600,
            check_threshold: 500,
            invalid_percent: 50.0,
            purge_interval_secs: 300,
        }
    }
}

impl BanSettings {
    pub fn ban_length(&self) -> Duration {
        Duration::from_secs(self.ban_length_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSettings {
    pub connection_secs: u64,
    pub rebroadcast_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connection_secs: 600,
            rebroadcast_secs: 60,
        }
    }
}

impl TimeoutSettings {
    pub fn connection(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }

    pub fn rebroadcast(&self) -> Duration {
        Duration::from_secs(self.rebroadcast_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingSettings {
    pub blocks_millis: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            blocks_millis: 1000,
        }
    }
}

impl PollingSettings {
    pub fn blocks(&self) -> Duration {
        Duration::from_millis(self.blocks_millis.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventsSettings {
    pub file: PathBuf,
    #[serde(default)]
    pub format: FileFormat,
}

impl Settings {
    /// Loads the config file and applies command line overrides.
    pub fn load(options: Options) -> Result<Self> {
        let settings = match Self::find_config_path(&options) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        let settings = settings.with_options(options);

        settings.validate()?;

        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        toml::from_str(
            &fs::read_to_string(path)
                .with_context(|| format!("failed to open config file `{}`", path.display()))?,
        )
        .with_context(|| format!("failed to deserialize config file `{}`", path.display()))
    }

    fn find_config_path(options: &Options) -> Option<PathBuf> {
        if let Some(path) = &options.config {
            return Some(path.clone());
        }

        dirs::config_dir()
            .map(|dir| dir.join("stratapool").join("config.toml"))
            .filter(|path| path.exists())
    }

    fn with_options(mut self, options: Options) -> Self {
        if let Some(host) = options.host {
            self.host = host;
        }

        if let Some(address) = options.address {
            self.address = Some(address);
        }

        if let Some(url) = options.daemon_url {
            self.daemon.url = url;
        }

        if let Some(username) = options.daemon_username {
            self.daemon.username = username;
        }

        if let Some(password) = options.daemon_password {
            self.daemon.password = password;
        }

        self
    }

    pub fn validate(&self) -> Result {
        ensure!(
            self.address.as_deref().is_some_and(|address| !address.is_empty()),
            "pool address is not set"
        );

        ensure!(
            self.ports.iter().any(|port| port.enabled),
            "no enabled stratum ports configured"
        );

        let fee = self.fee_percentage();

        ensure!(
            self.recipients
                .iter()
                .all(|recipient| recipient.percentage >= 0.0),
            "recipient percentages must not be negative"
        );

        ensure!(
            fee < 1.0,
            "recipient percentages add up to {fee}, which leaves nothing for the pool"
        );

        for port in &self.ports {
            let DifficultySettings {
                initial,
                minimum,
                maximum,
                target_time,
                retarget_time,
                variance,
            } = port.difficulty;

            ensure!(
                minimum > 0.0 && minimum <= initial && initial <= maximum,
                "port {} difficulty must satisfy 0 < minimum <= initial <= maximum",
                port.port
            );

            ensure!(
                target_time > 0.0,
                "port {} target time must be positive",
                port.port
            );

            ensure!(
                retarget_time >= target_time,
                "port {} retarget time must not be shorter than its target time",
                port.port
            );

            ensure!(
                (0.0..1.0).contains(&variance),
                "port {} variance must be in 0..1",
                port.port
            );
        }

        if self.ports.iter().any(|port| port.enabled && port.tls) {
            ensure!(
                self.tls.is_some(),
                "a port requires TLS but no [tls] section is configured"
            );
        }

        if let Some(auxiliary) = self.auxiliary.as_ref().filter(|aux| aux.enabled) {
            hex::decode(&auxiliary.header).context("invalid auxiliary header")?;
        }

        Ok(())
    }

    pub fn fee_percentage(&self) -> f64 {
        self.recipients
            .iter()
            .map(|recipient| recipient.percentage)
            .sum()
    }

    pub fn merge_mining(&self) -> Option<&AuxiliarySettings> {
        self.auxiliary.as_ref().filter(|auxiliary| auxiliary.enabled)
    }

    pub fn enabled_ports(&self) -> impl Iterator<Item = &PortSettings> {
        self.ports.iter().filter(|port| port.enabled)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn settings() -> Settings {
        Settings {
            address: Some("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into()),
            ..Default::default()
        }
    }

    #[track_caller]
    fn case(settings: Settings, expected: &str) {
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains(expected), "unexpected error: {err}");
    }

    #[test]
    fn config_file_parsing() {
        let config = r#"
            identifier = "pool-1"
            address = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"
            chain = "test"

            [[recipients]]
            address = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"
            percentage = 0.01

            [daemon]
            url = "http://127.0.0.1:18332"
            username = "user"
            password = "pass"

            [[ports]]
            port = 3333
            difficulty = { initial = 64, minimum = 16, maximum = 1024 }

            [banning]
            check_threshold = 5
            invalid_percent = 50

            [events]
            file = "events.csv"
            format = "csv"
        "#;

        let settings = toml::from_str::<Settings>(config).unwrap();

        assert_eq!(settings.identifier, "pool-1");
        assert_eq!(settings.chain, Chain::Test);
        assert_eq!(settings.recipients.len(), 1);
        assert_eq!(settings.daemon.url, "http://127.0.0.1:18332");
        assert_eq!(settings.daemon.timeout_secs, 10);
        assert_eq!(settings.ports.len(), 1);
        assert_eq!(settings.ports[0].port, 3333);
        assert!(settings.ports[0].enabled);
        assert_eq!(settings.ports[0].difficulty.initial, 64.0);
        assert_eq!(settings.ports[0].difficulty.target_time, 15.0);
        assert_eq!(settings.banning.check_threshold, 5);
        assert_eq!(settings.banning.ban_length_secs, 600);
        assert_eq!(settings.events.as_ref().unwrap().format, FileFormat::Csv);
        assert!(settings.merge_mining().is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Settings>("colour = \"blue\"").is_err());
        assert!(toml::from_str::<Settings>("[banning]\nlength = 1").is_err());
    }

    #[test]
    fn load_from_file_with_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(
            &path,
            "address = \"bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq\"\n[daemon]\nurl = \"http://10.0.0.1:8332\"\n",
        )
        .unwrap();

        let settings = Settings::load(Options {
            config: Some(path),
            host: Some("127.0.0.1".into()),
            daemon_password: Some("secret".into()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.daemon.url, "http://10.0.0.1:8332");
        assert_eq!(settings.daemon.password, "secret");
        assert_eq!(settings.ports, vec![PortSettings::default()]);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();

        let err = Settings::load(Options {
            config: Some(dir.path().join("missing.toml")),
            ..Default::default()
        })
        .unwrap_err();

        assert!(err.to_string().contains("failed to open config file"));
    }

    #[test]
    fn defaults_are_valid() {
        settings().validate().unwrap();
    }

    #[test]
    fn validation() {
        case(Settings::default(), "pool address is not set");

        let mut invalid = settings();
        invalid.ports[0].enabled = false;
        case(invalid, "no enabled stratum ports");

        let mut invalid = settings();
        invalid.recipients = vec![
            RecipientSettings {
                address: "a".into(),
                percentage: 0.6,
            },
            RecipientSettings {
                address: "b".into(),
                percentage: 0.4,
            },
        ];
        case(invalid, "leaves nothing for the pool");

        let mut invalid = settings();
        invalid.ports[0].difficulty.initial = 4.0;
        case(invalid, "minimum <= initial <= maximum");

        let mut invalid = settings();
        invalid.ports[0].difficulty.target_time = 0.0;
        case(invalid, "target time must be positive");

        let mut invalid = settings();
        invalid.ports[0].difficulty.retarget_time = 10.0;
        case(invalid, "retarget time");

        let mut invalid = settings();
        invalid.ports[0].tls = true;
        case(invalid, "no [tls] section");

        let mut invalid = settings();
        invalid.auxiliary = Some(AuxiliarySettings {
            enabled: true,
            header: "xyz".into(),
            ..Default::default()
        });
        case(invalid, "invalid auxiliary header");
    }

    #[test]
    fn durations() {
        let settings = settings();
        assert_eq!(settings.banning.ban_length(), Duration::from_secs(600));
        assert_eq!(settings.timeouts.rebroadcast(), Duration::from_secs(60));
        assert_eq!(settings.polling.blocks(), Duration::from_millis(1000));
        assert_eq!(
            settings.ports[0].difficulty.retarget(),
            Duration::from_secs(90)
        );
    }
}
