use {
    super::*,
    authorizer::DaemonAuthorizer,
    daemon::{Daemon, DaemonError, RPC_IN_INITIAL_DOWNLOAD},
    events::{EventSink, FileSink, LogSink, MultiSink},
    registry::tls_acceptor,
};

const EVENT_CHANNEL_CAPACITY: usize = 10_000;
const SYNC_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Startup steps, run in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
enum Phase {
    #[display("daemons")]
    Daemons,
    #[display("settings")]
    Settings,
    #[display("recipients")]
    Recipients,
    #[display("manager")]
    Manager,
    #[display("blockchain")]
    Blockchain,
    #[display("first job")]
    FirstJob,
    #[display("network")]
    Network,
    #[display("polling")]
    Polling,
}

/// The primary daemon, the optional merge-mined daemon, and what was last
/// seen of each chain.
struct Daemons {
    primary: Arc<Daemon>,
    auxiliary: Option<Arc<Daemon>>,
    aux_block: Mutex<Option<AuxBlock>>,
    tip: Mutex<Option<(u64, String)>>,
}

impl Daemons {
    fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            primary: Arc::new(Daemon::new(&settings.daemon)?),
            auxiliary: settings
                .merge_mining()
                .map(|auxiliary| Daemon::new(&auxiliary.daemon).map(Arc::new))
                .transpose()?,
            aux_block: Mutex::new(None),
            tip: Mutex::new(None),
        })
    }

    async fn check(&self) -> Result<(), DaemonError> {
        for daemon in iter::once(&self.primary).chain(&self.auxiliary) {
            let info = daemon.get_blockchain_info().await?;
            info!(
                "Daemon at {} is on {} at height {}",
                daemon.url(),
                info.chain,
                info.blocks
            );
        }

        Ok(())
    }

    /// Fetches the aux work unit, returning whether it changed.
    async fn refresh_aux(&self) -> Result<bool, DaemonError> {
        let Some(auxiliary) = &self.auxiliary else {
            return Ok(false);
        };

        let block = auxiliary.get_aux_block().await?;

        let mut current = self.aux_block.lock();

        let update = current
            .as_ref()
            .is_some_and(|current| current.hash != block.hash);

        *current = Some(block);

        Ok(update)
    }

    /// Whether the primary chain tip moved since the last check.
    async fn tip_changed(&self) -> Result<bool, DaemonError> {
        let info = self.primary.get_blockchain_info().await?;

        let tip = (info.blocks, info.best_block_hash);

        let mut last = self.tip.lock();

        if last.as_ref() == Some(&tip) {
            return Ok(false);
        }

        *last = Some(tip);

        Ok(true)
    }

    /// A primary template with the current aux work attached.
    async fn template(&self) -> Result<BlockTemplate, DaemonError> {
        let mut template = self.primary.get_block_template().await?;

        if self.auxiliary.is_some() {
            template.aux = self.aux_block.lock().clone();
        }

        Ok(template)
    }
}

/// Shared state of a running pool.
struct Engine {
    daemons: Daemons,
    events: EventSender,
    registry: Arc<Registry>,
    validator: Arc<Validator>,
}

impl Engine {
    async fn poll(&self) -> Result {
        let aux_update = self.daemons.refresh_aux().await?;

        if aux_update {
            let aux = self.daemons.aux_block.lock().clone();

            if let Some(aux) = aux {
                info!("New auxiliary block {} at height {}", aux.hash, aux.height);
            }
        }

        if !self.daemons.tip_changed().await? && !aux_update {
            return Ok(());
        }

        let template = self.daemons.template().await?;
        let height = template.height;

        if self.validator.handle_template(template, aux_update)? {
            info!("New block template at height {height}");
            self.registry.broadcast(true);
            self.log_network().await;
        }

        Ok(())
    }

    async fn rebroadcast(&self) -> Result {
        let template = self.daemons.template().await?;

        debug!("Refreshing jobs after a quiet period");

        if self.validator.handle_template(template.clone(), false)? {
            self.registry.broadcast(true);
        } else {
            self.validator.handle_updates(template)?;
            self.registry.broadcast(false);
        }

        Ok(())
    }

    /// Polls the daemons and refreshes idle jobs until cancelled. Runs apart
    /// from the event loop so slow RPC round trips never hold up events.
    fn spawn_polling(
        self: &Arc<Self>,
        period: Duration,
        mut watchdog: mpsc::Receiver<()>,
        cancel: CancellationToken,
        tasks: &mut JoinSet<()>,
    ) {
        let engine = self.clone();

        tasks.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Some(()) = watchdog.recv() => {
                        if let Err(err) = engine.rebroadcast().await {
                            warn!("Failed to refresh jobs: {err}");
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = engine.poll().await {
                            warn!("Failed to poll for new blocks: {err}");
                        }
                    }
                }
            }
        });
    }

    fn submit(self: &Arc<Self>, candidate: Accepted, tasks: &mut JoinSet<()>) {
        let engine = self.clone();

        match candidate.block_type {
            BlockType::Primary => {
                tasks.spawn(async move { engine.submit_primary(candidate).await });
            }
            BlockType::Auxiliary => {
                tasks.spawn(async move { engine.submit_auxiliary(candidate).await });
            }
            BlockType::Share => {}
        }
    }

    async fn log_network(&self) {
        match self.daemons.primary.get_mining_info().await {
            Ok(info) => info!(
                "Network at height {} with difficulty {} and {} H/s",
                info.blocks, info.difficulty, info.network_hash_ps
            ),
            Err(err) => debug!("Failed to fetch mining info: {err}"),
        }
    }

    async fn submit_primary(&self, candidate: Accepted) {
        info!(
            "Submitting block {} at height {}",
            candidate.hash, candidate.height
        );

        let error = match self.daemons.primary.submit_block(&candidate.hex).await {
            Ok(None) => confirm(&self.daemons.primary, &candidate.hash).await,
            Ok(Some(reason)) => Some(reason),
            Err(err) => Some(err.to_string()),
        };

        self.events.send(Event::Block(BlockEvent {
            block_type: BlockType::Primary,
            height: candidate.height,
            hash: candidate.hash,
            accepted: error.is_none(),
            error,
        }));

        match self.daemons.template().await {
            Ok(template) => match self.validator.handle_template(template, false) {
                Ok(true) => {
                    self.registry.broadcast(true);
                }
                Ok(false) => {}
                Err(err) => warn!("Failed to build job after block submission: {err}"),
            },
            Err(err) => warn!("Failed to fetch template after block submission: {err}"),
        }
    }

    async fn submit_auxiliary(&self, candidate: Accepted) {
        let (Some(daemon), Some(hash), Some(aux_pow)) = (
            &self.daemons.auxiliary,
            &candidate.aux_hash,
            &candidate.aux_pow,
        ) else {
            return;
        };

        info!(
            "Submitting auxiliary block {hash} at height {}",
            candidate.height
        );

        let error = match daemon.submit_aux_block(hash, aux_pow).await {
            Ok(true) => confirm(daemon, hash).await,
            Ok(false) => Some("rejected".into()),
            Err(err) => Some(err.to_string()),
        };

        self.events.send(Event::Block(BlockEvent {
            block_type: BlockType::Auxiliary,
            height: candidate.height,
            hash: hash.clone(),
            accepted: error.is_none(),
            error,
        }));
    }
}

/// Looks a submitted block up again, returning an error when the daemon does
/// not know it.
async fn confirm(daemon: &Daemon, hash: &str) -> Option<String> {
    match daemon.get_block(hash).await {
        Ok(block) if block.hash == hash && block.confirmations >= 0 => None,
        Ok(_) => Some("block not found after submission".into()),
        Err(err) => Some(err.to_string()),
    }
}

pub struct Pool {
    settings: Settings,
}

impl Pool {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result {
        let mut tasks = JoinSet::new();

        let result = self.serve(&cancel, &mut tasks).await;

        cancel.cancel();

        while tasks.join_next().await.is_some() {}

        info!("Pool stopped");

        result
    }

    fn phase(phase: Phase) {
        info!("Starting {phase} phase");
    }

    async fn serve(&self, cancel: &CancellationToken, tasks: &mut JoinSet<()>) -> Result {
        let settings = &self.settings;

        Self::phase(Phase::Daemons);
        let daemons = Daemons::new(settings)?;
        daemons
            .check()
            .await
            .with_context(|| format!("{} phase failed", Phase::Daemons))?;

        Self::phase(Phase::Settings);
        let chain = self
            .check_settings(&daemons)
            .await
            .with_context(|| format!("{} phase failed", Phase::Settings))?;

        Self::phase(Phase::Recipients);
        let payout = self.payout(chain)?;

        Self::phase(Phase::Manager);
        let (events, mut event_rx, mut candidate_rx) =
            EventSender::with_candidates(EVENT_CHANNEL_CAPACITY);
        let mut sink = self.sinks().await?;

        let validator = Arc::new(Validator::new(
            payout,
            Extranonces::default(),
            settings.identifier.clone(),
            events.clone(),
        ));

        Self::phase(Phase::Blockchain);
        if !Self::wait_for_sync(&daemons, cancel).await? {
            return Ok(());
        }

        Self::phase(Phase::FirstJob);
        daemons
            .refresh_aux()
            .await
            .with_context(|| format!("{} phase failed", Phase::FirstJob))?;

        validator.handle_template(
            daemons
                .template()
                .await
                .with_context(|| format!("{} phase failed", Phase::FirstJob))?,
            false,
        )?;

        if let Some(job) = validator.current_job() {
            for port in settings.enabled_ports() {
                if job.difficulty < port.difficulty.initial {
                    warn!(
                        "Network difficulty {} is below the initial difficulty {} of port {}",
                        job.difficulty, port.difficulty.initial, port.port
                    );
                }
            }
        }

        Self::phase(Phase::Network);
        let authorizer = Arc::new(DaemonAuthorizer::new(
            daemons.primary.clone(),
            daemons.auxiliary.clone(),
        ));

        let registry = Arc::new(Registry::new(
            settings,
            validator.clone(),
            authorizer,
            events.clone(),
        ));

        let tls = match &settings.tls {
            Some(tls) if settings.enabled_ports().any(|port| port.tls) => Some(tls_acceptor(tls)?),
            _ => None,
        };

        for port in settings.enabled_ports() {
            registry
                .listen(
                    &settings.host,
                    port.clone(),
                    if port.tls { tls.clone() } else { None },
                    cancel.clone(),
                    tasks,
                )
                .await?;
        }

        registry.broadcast(true);

        let watchdog = registry.spawn_watchdog(cancel.clone(), tasks);
        registry.spawn_ban_purge(cancel.clone(), tasks);

        let engine = Arc::new(Engine {
            daemons,
            events,
            registry,
            validator,
        });

        Self::phase(Phase::Polling);
        engine.spawn_polling(settings.polling.blocks(), watchdog, cancel.clone(), tasks);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(candidate) = candidate_rx.recv() => engine.submit(candidate, tasks),
                Some(event) = event_rx.recv() => {
                    if let Err(err) = sink.record(&event).await {
                        warn!("Error recording event: {err}");
                    }
                }
                Some(result) = tasks.join_next() => {
                    if let Err(err) = result {
                        error!("Task failed: {err}");
                    }
                }
            }
        }

        while let Ok(candidate) = candidate_rx.try_recv() {
            match candidate.block_type {
                BlockType::Primary => engine.submit_primary(candidate).await,
                BlockType::Auxiliary => engine.submit_auxiliary(candidate).await,
                BlockType::Share => {}
            }
        }

        while let Ok(event) = event_rx.try_recv() {
            if let Err(err) = sink.record(&event).await {
                warn!("Error recording event during shutdown: {err}");
            }
        }

        sink.flush().await
    }

    async fn check_settings(&self, daemons: &Daemons) -> Result<Chain> {
        let info = daemons.primary.get_blockchain_info().await?;

        let chain = Chain::from_daemon(&info.chain)?;

        if chain != self.settings.chain {
            warn!(
                "Configured chain {} differs from daemon chain {chain}, using {chain}",
                self.settings.chain
            );
        }

        let address = self
            .settings
            .address
            .as_deref()
            .context("pool address is not set")?;

        ensure!(
            daemons.primary.validate_address(address).await?,
            "daemon reports pool address `{address}` as invalid"
        );

        let mining = daemons.primary.get_mining_info().await?;

        info!(
            "Mining on {chain} at height {} with network difficulty {}",
            mining.blocks, mining.difficulty
        );

        Ok(chain)
    }

    fn payout(&self, chain: Chain) -> Result<Payout> {
        let settings = &self.settings;

        let address = settings.address.as_deref().context("pool address is not set")?;

        let recipients = settings
            .recipients
            .iter()
            .map(|recipient| {
                Ok(Recipient {
                    script: address_to_script(&recipient.address, chain)
                        .with_context(|| format!("invalid recipient `{}`", recipient.address))?,
                    percentage: recipient.percentage,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if recipients.is_empty() {
            warn!("No fee recipients configured, the pool keeps the whole block reward");
        } else {
            info!(
                "Paying {} recipients {}% of each block",
                recipients.len(),
                settings.fee_percentage() * 100.0
            );
        }

        Ok(Payout {
            pool_script: address_to_script(address, chain)?,
            recipients,
            aux_header: settings
                .merge_mining()
                .map(|auxiliary| hex::decode(&auxiliary.header))
                .transpose()
                .context("invalid auxiliary header")?,
            tag: settings
                .coinbase_tag
                .as_deref()
                .unwrap_or_default()
                .as_bytes()
                .to_vec(),
        })
    }

    async fn sinks(&self) -> Result<MultiSink> {
        let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(LogSink)];

        if let Some(events) = &self.settings.events {
            sinks.push(Box::new(FileSink::new(&events.file, events.format).await?));
            info!("Writing events to {}", events.file.display());
        }

        Ok(MultiSink::new(sinks))
    }

    /// Waits until the daemons stop reporting initial block download.
    /// Returns false when cancelled first.
    async fn wait_for_sync(daemons: &Daemons, cancel: &CancellationToken) -> Result<bool> {
        loop {
            let primary = daemons.primary.get_block_template().await.map(|_| ());

            let auxiliary = match &daemons.auxiliary {
                Some(auxiliary) => auxiliary.get_aux_block().await.map(|_| ()),
                None => Ok(()),
            };

            let syncing = [&primary, &auxiliary]
                .into_iter()
                .any(|result| matches!(result, Err(err) if err.code() == Some(RPC_IN_INITIAL_DOWNLOAD)));

            if !syncing {
                primary?;
                auxiliary?;
                return Ok(true);
            }

            match daemons.primary.get_blockchain_info().await {
                Ok(info) => info!(
                    "Waiting for daemon to sync, {:.2}% verified",
                    info.verification_progress * 100.0
                ),
                Err(err) => info!("Waiting for daemon to sync: {err}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = sleep(SYNC_RETRY_INTERVAL) => {}
            }
        }
    }
}
