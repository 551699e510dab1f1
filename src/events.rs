use super::*;

mod file;

pub(crate) use file::FileSink;
pub use file::FileFormat;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    NewJob(NewJobEvent),
    Share(ShareEvent),
    Client(ClientEvent),
    Block(BlockEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewJobEvent {
    pub job: String,
    pub height: u64,
    pub difficulty: f64,
    pub clean: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ClientEventKind {
    #[display("connected")]
    Connected,
    #[display("disconnected")]
    Disconnected,
    #[display("banned")]
    Banned,
    #[display("kicked")]
    Kicked,
    #[display("forgiven")]
    Forgiven,
    #[display("timed out")]
    TimedOut,
    #[display("flooded")]
    Flooded,
    #[display("malformed")]
    Malformed,
    #[display("unknown method")]
    UnknownMethod,
    #[display("difficulty queued")]
    DifficultyQueued,
    #[display("difficulty updated")]
    DifficultyUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientEvent {
    pub session: String,
    pub ip: IpAddr,
    pub port: u16,
    pub event: ClientEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockEvent {
    pub block_type: BlockType,
    pub height: u64,
    pub hash: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cloneable handle components publish events through. Sending never waits;
/// when the consumer falls behind events are dropped with a warning. Block
/// candidates travel on a separate unbounded channel and are never dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    candidates: mpsc::UnboundedSender<Accepted>,
    events: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, events, _) = Self::with_candidates(capacity);
        (sender, events)
    }

    pub fn with_candidates(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<Event>,
        mpsc::UnboundedReceiver<Accepted>,
    ) {
        let (events, events_rx) = mpsc::channel(capacity);
        let (candidates, candidates_rx) = mpsc::unbounded_channel();
        (Self { candidates, events }, events_rx, candidates_rx)
    }

    pub(crate) fn send(&self, event: Event) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event channel closed");
            }
        }
    }

    pub(crate) fn candidate(&self, candidate: Accepted) {
        if let Err(err) = self.candidates.send(candidate) {
            warn!(
                "Nobody is submitting blocks, dropping {} candidate {}",
                err.0.block_type, err.0.hash
            );
        }
    }
}

#[async_trait]
pub(crate) trait EventSink: Send + Sync {
    async fn record(&mut self, event: &Event) -> Result;

    async fn flush(&mut self) -> Result {
        Ok(())
    }
}

/// Writes every event to the log.
pub(crate) struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn record(&mut self, event: &Event) -> Result {
        match event {
            Event::NewJob(job) => info!(
                "New job {} at height {} with network difficulty {} (clean: {})",
                job.job, job.height, job.difficulty, job.clean
            ),
            Event::Share(share) => match &share.result {
                ShareResult::Valid(accepted) => info!(
                    "Accepted {} from {} [{}] at difficulty {} (share difficulty {})",
                    accepted.block_type,
                    share.addr_primary.as_deref().unwrap_or("(unauthorized)"),
                    share.ip,
                    share.difficulty,
                    accepted.share_diff
                ),
                ShareResult::Invalid { error } => info!(
                    "Rejected share from {} [{}]: {error}",
                    share.addr_primary.as_deref().unwrap_or("(unauthorized)"),
                    share.ip
                ),
            },
            Event::Client(client) => debug!(
                "Client {} [{}:{}] {}",
                client.session, client.ip, client.port, client.event
            ),
            Event::Block(block) if block.accepted => info!(
                "{} block {} at height {} accepted",
                block.block_type, block.hash, block.height
            ),
            Event::Block(block) => warn!(
                "{} block {} at height {} rejected: {}",
                block.block_type,
                block.hash,
                block.height,
                block.error.as_deref().unwrap_or("unknown")
            ),
        }

        Ok(())
    }
}

/// Fans one event out to several sinks, logging failures and carrying on.
pub(crate) struct MultiSink(Vec<Box<dyn EventSink>>);

impl MultiSink {
    pub(crate) fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self(sinks)
    }
}

#[async_trait]
impl EventSink for MultiSink {
    async fn record(&mut self, event: &Event) -> Result {
        for sink in &mut self.0 {
            if let Err(err) = sink.record(event).await {
                warn!("Error recording event: {err}");
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result {
        for sink in &mut self.0 {
            sink.flush().await?;
        }
        Ok(())
    }
}
