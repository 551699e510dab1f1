use {
    super::*,
    bans::{BanStatus, Bans},
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
    },
    session::Session,
    tokio::sync::mpsc::error::TrySendError,
    tokio_rustls::TlsAcceptor,
};

const SESSION_QUEUE: usize = 16;
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A listening port and the vardiff state of its sessions.
pub(crate) struct Port {
    pub(crate) settings: PortSettings,
    pub(crate) vardiff: Vardiff,
}

impl Port {
    fn new(settings: PortSettings) -> Self {
        Self {
            vardiff: Vardiff::new(settings.difficulty),
            settings,
        }
    }
}

/// Tracks live sessions, fans jobs out to them and guards the door with the
/// ban table.
pub struct Registry {
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) bans: Bans,
    pub(crate) events: EventSender,
    pub(crate) timeouts: TimeoutSettings,
    pub(crate) validator: Arc<Validator>,
    last_broadcast: watch::Sender<tokio::time::Instant>,
    next_id: AtomicU64,
    sessions: DashMap<SessionId, mpsc::Sender<Arc<Notify>>>,
}

impl Registry {
    pub fn new(
        settings: &Settings,
        validator: Arc<Validator>,
        authorizer: Arc<dyn Authorizer>,
        events: EventSender,
    ) -> Self {
        Self {
            authorizer,
            bans: Bans::new(settings.banning),
            events,
            timeouts: settings.timeouts,
            validator,
            last_broadcast: watch::Sender::new(tokio::time::Instant::now()),
            next_id: AtomicU64::new(0),
            sessions: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub(crate) fn remove(&self, id: SessionId) {
        self.sessions.remove(&id);
    }

    /// Binds `host:port` and serves miners on it until cancelled.
    pub async fn listen(
        self: &Arc<Self>,
        host: &str,
        settings: PortSettings,
        tls: Option<TlsAcceptor>,
        cancel: CancellationToken,
        tasks: &mut JoinSet<()>,
    ) -> Result<SocketAddr> {
        let listener = TcpListener::bind((host, settings.port))
            .await
            .with_context(|| format!("failed to bind stratum port {host}:{}", settings.port))?;

        let address = listener.local_addr()?;

        info!(
            "Listening for miners on {address}{}",
            if tls.is_some() { " (TLS)" } else { "" }
        );

        let registry = self.clone();
        let port = Arc::new(Port::new(settings));

        tasks.spawn(async move { registry.accept(listener, port, tls, cancel).await });

        Ok(address)
    }

    async fn accept(
        self: Arc<Self>,
        listener: TcpListener,
        port: Arc<Port>,
        tls: Option<TlsAcceptor>,
        cancel: CancellationToken,
    ) {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.connect(stream, peer, &port, tls.clone(), &cancel, &mut sessions);
                    }
                    Err(err) => warn!("Failed to accept connection: {err}"),
                },
            }
        }

        while sessions.join_next().await.is_some() {}

        debug!("Stopped listening on port {}", port.settings.port);
    }

    fn client_event(
        &self,
        id: SessionId,
        ip: IpAddr,
        port: u16,
        event: ClientEventKind,
        detail: Option<String>,
    ) {
        self.events.send(Event::Client(ClientEvent {
            session: id.to_string(),
            ip,
            port,
            event,
            difficulty: None,
            detail,
        }));
    }

    fn connect(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        port: &Arc<Port>,
        tls: Option<TlsAcceptor>,
        cancel: &CancellationToken,
        sessions: &mut JoinSet<()>,
    ) {
        let ip = peer.ip().to_canonical();
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let number = port.settings.port;

        self.client_event(id, ip, number, ClientEventKind::Connected, None);

        match self.bans.check(ip, Instant::now()) {
            BanStatus::Banned { remaining } => {
                info!("Kicked banned client {ip}, {}s remaining", remaining.as_secs());
                self.client_event(
                    id,
                    ip,
                    number,
                    ClientEventKind::Kicked,
                    Some(remaining.as_secs().to_string()),
                );
                self.client_event(id, ip, number, ClientEventKind::Disconnected, None);
                return;
            }
            BanStatus::Forgiven => {
                info!("Forgave client {ip}");
                self.client_event(id, ip, number, ClientEventKind::Forgiven, None);
            }
            BanStatus::Clear => {}
        }

        if let Err(err) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {peer}: {err}");
        }

        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        self.sessions.insert(id, tx);

        let registry = self.clone();
        let port = port.clone();
        let cancel = cancel.clone();

        sessions.spawn(async move {
            let Some(acceptor) = tls else {
                let (reader, writer) = stream.into_split();
                Session::new(id, ip, port, registry, rx, reader, writer)
                    .serve(cancel)
                    .await;
                return;
            };

            match timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(stream)) => {
                    let (reader, writer) = tokio::io::split(stream);
                    Session::new(id, ip, port, registry, rx, reader, writer)
                        .serve(cancel)
                        .await;
                }
                Ok(Err(err)) => {
                    debug!("TLS handshake with {peer} failed: {err}");
                    registry.remove(id);
                    registry.client_event(id, ip, number, ClientEventKind::Disconnected, None);
                }
                Err(_) => {
                    debug!("TLS handshake with {peer} timed out");
                    registry.remove(id);
                    registry.client_event(id, ip, number, ClientEventKind::Disconnected, None);
                }
            }
        });
    }

    /// Sends the current job to every session and restarts the rebroadcast
    /// timer. Returns false when there is no job yet.
    pub fn broadcast(&self, clean: bool) -> bool {
        let Some(job) = self.validator.current_job() else {
            return false;
        };

        let notify = Arc::new(job.handle_parameters(clean));

        self.sessions
            .retain(|id, sender| match sender.try_send(notify.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Session {id} is not keeping up, skipping job {}", notify.job_id);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });

        self.last_broadcast.send_replace(tokio::time::Instant::now());

        true
    }

    /// Signals once whenever no job has been broadcast for the rebroadcast
    /// period, then waits for the next broadcast before arming again.
    pub fn spawn_watchdog(
        &self,
        cancel: CancellationToken,
        tasks: &mut JoinSet<()>,
    ) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let mut last_broadcast = self.last_broadcast.subscribe();
        let period = self.timeouts.rebroadcast();

        tasks.spawn(async move {
            loop {
                let deadline = *last_broadcast.borrow_and_update() + period;

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = last_broadcast.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep_until(deadline) => {
                        debug!("No job broadcast for {}s", period.as_secs());

                        if tx.try_send(()).is_err() && tx.is_closed() {
                            break;
                        }

                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            changed = last_broadcast.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });

        rx
    }

    /// Periodically drops expired bans.
    pub fn spawn_ban_purge(self: &Arc<Self>, cancel: CancellationToken, tasks: &mut JoinSet<()>) {
        let registry = self.clone();

        tasks.spawn(async move {
            let mut ticker = interval(registry.bans.settings().purge_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = registry.bans.purge(Instant::now());
                        if purged > 0 {
                            info!("Purged {purged} expired bans");
                        }
                    }
                }
            }
        });
    }
}

/// Loads the certificate chain and key for TLS ports.
pub(crate) fn tls_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor> {
    let certs = CertificateDer::pem_file_iter(&settings.cert)
        .with_context(|| format!("failed to read certificate `{}`", settings.cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid certificate `{}`", settings.cert.display()))?;

    ensure!(
        !certs.is_empty(),
        "no certificates found in `{}`",
        settings.cert.display()
    );

    let key = PrivateKeyDer::from_pem_file(&settings.key)
        .with_context(|| format!("failed to read private key `{}`", settings.key.display()))?;

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("failed to select TLS protocol versions")?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("invalid TLS certificate or key")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
