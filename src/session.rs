use {
    super::*,
    bans::{Consequence, ShareCounter},
    registry::{Port, Registry},
    tokio_util::codec::LinesCodecError,
};

/// Opaque connection identifier, also used as the subscription id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Disconnect {
    Banned,
    Closed,
    Flooded,
    Malformed(String),
    Rejected,
    Shutdown,
    TimedOut(u64),
    UnknownMethod(String),
}

impl Disconnect {
    fn event(&self) -> Option<(ClientEventKind, Option<String>)> {
        match self {
            Self::Banned => Some((ClientEventKind::Banned, None)),
            Self::Flooded => Some((ClientEventKind::Flooded, None)),
            Self::Malformed(detail) => Some((ClientEventKind::Malformed, Some(detail.clone()))),
            Self::TimedOut(secs) => Some((
                ClientEventKind::TimedOut,
                Some(format!("The last submitted share was {secs} seconds ago")),
            )),
            Self::UnknownMethod(method) => {
                Some((ClientEventKind::UnknownMethod, Some(method.clone())))
            }
            Self::Closed | Self::Rejected | Self::Shutdown => None,
        }
    }
}

/// Splits a worker name into primary and auxiliary addresses. Anything
/// outside `[a-zA-Z0-9.,]` is dropped first.
pub(crate) fn parse_worker_name(name: &str) -> (Option<String>, Option<String>) {
    let cleaned = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ','))
        .collect::<String>();

    let mut addresses = cleaned.split(',');

    let nonempty = |address: Option<&str>| {
        address
            .filter(|address| !address.is_empty())
            .map(String::from)
    };

    let primary = nonempty(addresses.next());
    let auxiliary = nonempty(addresses.next());

    (primary, auxiliary)
}

/// Difficulty requested through a `d=<number>` password flag. The last flag
/// wins; non-positive values are ignored.
pub(crate) fn password_difficulty(password: &str) -> Option<f64> {
    fn is_decimal(s: &str) -> bool {
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

        match s.split_once('.') {
            Some((whole, fraction)) => {
                all_digits(whole) && !fraction.is_empty() && all_digits(fraction)
            }
            None => !s.is_empty() && all_digits(s),
        }
    }

    password
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '='))
        .collect::<String>()
        .split(',')
        .filter_map(|flag| flag.strip_prefix("d="))
        .filter(|value| is_decimal(value))
        .filter_map(|value| value.parse::<f64>().ok())
        .filter(|difficulty| difficulty.is_finite() && *difficulty > 0.0)
        .last()
}

/// One miner connection.
pub(crate) struct Session<R, W> {
    activity: Instant,
    addr_auxiliary: Option<String>,
    addr_primary: Option<String>,
    asicboost: bool,
    authorized: bool,
    difficulty: f64,
    extranonce1: Option<Extranonce>,
    id: SessionId,
    ip: IpAddr,
    jobs: mpsc::Receiver<Arc<Notify>>,
    pending_difficulty: Option<f64>,
    port: Arc<Port>,
    previous_difficulty: Option<(f64, Instant)>,
    reader: FramedRead<R, LinesCodec>,
    registry: Arc<Registry>,
    shares: ShareCounter,
    static_difficulty: bool,
    version_mask: Version,
    writer: FramedWrite<W, LinesCodec>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        id: SessionId,
        ip: IpAddr,
        port: Arc<Port>,
        registry: Arc<Registry>,
        jobs: mpsc::Receiver<Arc<Notify>>,
        reader: R,
        writer: W,
    ) -> Self {
        Self {
            activity: Instant::now(),
            addr_auxiliary: None,
            addr_primary: None,
            asicboost: false,
            authorized: false,
            difficulty: 0.0,
            extranonce1: None,
            id,
            ip,
            jobs,
            pending_difficulty: None,
            port,
            previous_difficulty: None,
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE)),
            registry,
            shares: ShareCounter::default(),
            static_difficulty: false,
            version_mask: Version(0),
            writer: FramedWrite::new(writer, LinesCodec::new()),
        }
    }

    pub(crate) async fn serve(mut self, cancel: CancellationToken) {
        let reason = loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Disconnect::Shutdown),
                notify = self.jobs.recv() => match notify {
                    Some(notify) => self.broadcast_job(&notify).await,
                    None => Err(Disconnect::Shutdown),
                },
                line = self.reader.next() => self.handle_line(line).await,
            };

            if let Err(reason) = result {
                break reason;
            }
        };

        debug!("Session {} [{}] ended: {reason:?}", self.id, self.ip);

        if let Some((kind, detail)) = reason.event() {
            self.emit(kind, None, detail);
        }

        self.emit(ClientEventKind::Disconnected, None, None);

        self.registry.remove(self.id);
        self.port.vardiff.remove(self.id);

        let _ = SinkExt::<String>::close(&mut self.writer).await;
    }

    fn label(&self) -> String {
        format!(
            "{} [{}]",
            self.addr_primary.as_deref().unwrap_or("(unauthorized)"),
            self.ip
        )
    }

    fn emit(&self, event: ClientEventKind, difficulty: Option<f64>, detail: Option<String>) {
        self.registry.events.send(Event::Client(ClientEvent {
            session: self.id.to_string(),
            ip: self.ip,
            port: self.port.settings.port,
            event,
            difficulty,
            detail,
        }));
    }

    async fn handle_line(
        &mut self,
        line: Option<Result<String, LinesCodecError>>,
    ) -> Result<(), Disconnect> {
        let line = match line {
            None => return Err(Disconnect::Closed),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("Client {} flooded the connection", self.label());
                return Err(Disconnect::Flooded);
            }
            Some(Err(LinesCodecError::Io(err))) if err.kind() == io::ErrorKind::InvalidData => {
                warn!("Undecodable line from {}: {err}", self.label());
                return Err(Disconnect::Malformed(err.to_string()));
            }
            Some(Err(LinesCodecError::Io(err))) => {
                debug!("Read error from {}: {err}", self.label());
                return Err(Disconnect::Closed);
            }
            Some(Ok(line)) => line,
        };

        if line.trim().is_empty() {
            return Ok(());
        }

        let message = serde_json::from_str::<Message>(&line).map_err(|err| {
            warn!("Malformed message from {}: {err}", self.label());
            Disconnect::Malformed(err.to_string())
        })?;

        // A missing or null id still names a method; replies then carry a
        // null id.
        let (id, method, params) = match message {
            Message::Request { id, method, params } => (id, method, params),
            Message::Notification { method, params } => (Id::Null, method, params),
            Message::Response { .. } => {
                warn!("Unexpected response from {}", self.label());
                return Err(Disconnect::UnknownMethod(String::new()));
            }
        };

        match method.as_str() {
            "mining.subscribe" => self.subscribe(id).await,
            "mining.authorize" => {
                let authorize = serde_json::from_value::<Authorize>(params).map_err(|err| {
                    warn!("Malformed authorize from {}: {err}", self.label());
                    Disconnect::Malformed(err.to_string())
                })?;

                self.authorize(id, authorize).await
            }
            "mining.configure" => self.configure(id).await,
            "mining.multi_version" => {
                self.multi_version(&params);
                Ok(())
            }
            "mining.submit" => self.submit(id, params).await,
            "mining.get_transactions" => {
                self.respond(
                    id,
                    Some(json!([])),
                    Some(StratumError::NotSupported.into_response()),
                )
                .await
            }
            "mining.extranonce.subscribe" => {
                self.respond(
                    id,
                    Some(json!(false)),
                    Some(StratumError::NotSupported.into_response()),
                )
                .await
            }
            method => {
                warn!("Unknown method {method} from {}", self.label());
                Err(Disconnect::UnknownMethod(method.into()))
            }
        }
    }

    async fn send(&mut self, message: Message) -> Result<(), Disconnect> {
        let frame = serde_json::to_string(&message).map_err(|err| {
            error!("Failed to serialize message for {}: {err}", self.label());
            Disconnect::Closed
        })?;

        self.writer.send(frame).await.map_err(|err| {
            debug!("Write error to {}: {err}", self.label());
            Disconnect::Closed
        })
    }

    async fn respond(
        &mut self,
        id: Id,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    ) -> Result<(), Disconnect> {
        self.send(Message::Response { id, result, error }).await
    }

    async fn notify(&mut self, method: &str, params: impl Serialize) -> Result<(), Disconnect> {
        let message = Message::notification(method, params).map_err(|err| {
            error!("Failed to encode {method}: {err}");
            Disconnect::Closed
        })?;

        self.send(message).await
    }

    async fn subscribe(&mut self, id: Id) -> Result<(), Disconnect> {
        let extranonces = *self.registry.validator.extranonces();
        let extranonce1 = extranonces.next_extranonce1();

        debug!(
            "Subscribed {} with extranonce1 {extranonce1}",
            self.label()
        );

        self.extranonce1 = Some(extranonce1.clone());

        self.respond(
            id,
            Some(json!(SubscribeResult::new(
                &self.id.to_string(),
                extranonce1,
                extranonces.extranonce2_size(),
            ))),
            None,
        )
        .await?;

        self.broadcast_difficulty(self.port.settings.difficulty.initial)
            .await?;

        if let Some(job) = self.registry.validator.current_job() {
            self.broadcast_job(&Arc::new(job.handle_parameters(true)))
                .await?;
        }

        Ok(())
    }

    async fn authorize(&mut self, id: Id, authorize: Authorize) -> Result<(), Disconnect> {
        let (primary, auxiliary) = parse_worker_name(&authorize.username);

        self.addr_primary = primary;
        self.addr_auxiliary = auxiliary;

        if let Some(difficulty) = authorize.password.as_deref().and_then(password_difficulty) {
            self.enqueue_difficulty(difficulty);
            self.static_difficulty = true;
        }

        let authorization = self
            .registry
            .authorizer
            .authorize(
                self.ip,
                self.port.settings.port,
                self.addr_primary.as_deref(),
                self.addr_auxiliary.as_deref(),
                authorize.password.as_deref(),
            )
            .await;

        self.authorized = authorization.error.is_none() && authorization.authorized;

        if authorization.disconnect {
            info!("Authorizer disconnected {}", self.label());
            return Err(Disconnect::Rejected);
        }

        info!(
            "Authorization of {} {}",
            self.label(),
            if self.authorized { "granted" } else { "denied" }
        );

        self.respond(
            id,
            Some(json!(self.authorized)),
            authorization.error.map(StratumError::into_response),
        )
        .await
    }

    async fn configure(&mut self, id: Id) -> Result<(), Disconnect> {
        self.respond(
            id,
            Some(json!(ConfigureResult {
                version_rolling: true,
                version_rolling_mask: VERSION_ROLLING_MASK,
            })),
            None,
        )
        .await?;

        self.asicboost = true;
        self.version_mask = VERSION_ROLLING_MASK;

        Ok(())
    }

    fn multi_version(&mut self, params: &Value) {
        let version = params
            .get(0)
            .and_then(|version| {
                version
                    .as_i64()
                    .or_else(|| version.as_str()?.trim().parse().ok())
            })
            .unwrap_or(0);

        if version > 1 {
            self.asicboost = true;
            self.version_mask = VERSION_ROLLING_MASK;
        } else {
            self.asicboost = false;
            self.version_mask = Version(0);
        }
    }

    async fn submit(&mut self, id: Id, params: Value) -> Result<(), Disconnect> {
        self.activity = Instant::now();

        let submit = match serde_json::from_value::<Submit>(params) {
            Ok(submit) => submit,
            Err(err) => {
                debug!("Malformed submission from {}: {err}", self.label());
                return self.reject(id, StratumError::MalformedSubmission).await;
            }
        };

        if self.addr_primary.is_none() {
            let (primary, auxiliary) = parse_worker_name(&submit.username);
            self.addr_primary = primary;
            self.addr_auxiliary = auxiliary;
        }

        if !self.authorized {
            return self.reject(id, StratumError::UnauthorizedWorker).await;
        }

        let Some(extranonce1) = self.extranonce1.clone() else {
            return self.reject(id, StratumError::NotSubscribed).await;
        };

        let retarget = self.port.settings.difficulty.retarget();

        let request = ShareRequest {
            job_id: submit.job_id,
            previous_difficulty: self
                .previous_difficulty
                .filter(|(_, changed)| changed.elapsed() < retarget)
                .map(|(difficulty, _)| difficulty),
            difficulty: self.difficulty,
            ip: self.ip,
            port: self.port.settings.port,
            addr_primary: self.addr_primary.clone(),
            addr_auxiliary: self.addr_auxiliary.clone(),
            submission: Submission {
                extranonce1,
                extranonce2: submit.extranonce2,
                ntime: submit.ntime,
                nonce: submit.nonce,
                version_bits: submit.version_bits,
                asicboost: self.asicboost,
                version_mask: self.version_mask,
            },
        };

        let result = self.registry.validator.handle_share(&request);

        if result.is_ok()
            && let Some(difficulty) =
                self.port
                    .vardiff
                    .record(self.id, self.difficulty, Instant::now())
        {
            self.enqueue_difficulty(difficulty);
        }

        if self.consider_ban(result.is_ok()) {
            return Err(Disconnect::Banned);
        }

        match result {
            Ok(_) => self.respond(id, Some(json!(true)), None).await,
            Err(err) => self.respond(id, None, Some(err.into_response())).await,
        }
    }

    async fn reject(&mut self, id: Id, error: StratumError) -> Result<(), Disconnect> {
        self.respond(id, None, Some(error.into_response())).await?;

        if self.consider_ban(false) {
            return Err(Disconnect::Banned);
        }

        Ok(())
    }

    /// Tallies a share, banning the address once too many are invalid.
    fn consider_ban(&mut self, valid: bool) -> bool {
        match self.shares.record(valid, self.registry.bans.settings()) {
            Consequence::Ban => {
                warn!("Banning {} for submitting invalid shares", self.label());
                self.registry.bans.ban(self.ip, Instant::now());
                true
            }
            Consequence::None | Consequence::Reset => false,
        }
    }

    fn enqueue_difficulty(&mut self, difficulty: f64) {
        if self.static_difficulty {
            return;
        }

        self.pending_difficulty = Some(difficulty);
        self.emit(ClientEventKind::DifficultyQueued, Some(difficulty), None);
    }

    async fn broadcast_difficulty(&mut self, difficulty: f64) -> Result<bool, Disconnect> {
        if difficulty == self.difficulty {
            return Ok(false);
        }

        if self.difficulty > 0.0 {
            self.previous_difficulty = Some((self.difficulty, Instant::now()));
        }

        self.difficulty = difficulty;

        self.notify(
            "mining.set_difficulty",
            SetDifficulty(Difficulty::from(difficulty)),
        )
        .await?;

        Ok(true)
    }

    async fn broadcast_job(&mut self, notify: &Notify) -> Result<(), Disconnect> {
        let idle = self.activity.elapsed();

        if idle > self.registry.timeouts.connection() {
            warn!("Client {} timed out", self.label());
            return Err(Disconnect::TimedOut(idle.as_secs()));
        }

        if let Some(difficulty) = self.pending_difficulty.take()
            && self.broadcast_difficulty(difficulty).await?
        {
            self.emit(ClientEventKind::DifficultyUpdated, Some(difficulty), None);
        }

        self.notify("mining.notify", notify).await
    }
}
