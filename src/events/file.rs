use {
    super::*,
    tokio::{
        fs::OpenOptions,
        io::{AsyncWriteExt, BufWriter},
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Json,
    Csv,
}

/// Appends events to a file, one per line.
pub(crate) struct FileSink {
    format: FileFormat,
    writer: BufWriter<tokio::fs::File>,
}

impl FileSink {
    pub(crate) async fn new(path: &Path, format: FileFormat) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open events file `{}`", path.display()))?;

        Ok(Self {
            format,
            writer: BufWriter::new(file),
        })
    }

    fn to_csv(event: &Event, timestamp: u64) -> String {
        fn quote_if_needed(s: &str) -> String {
            if s.contains(',') || s.contains('"') {
                format!("\"{}\"", s.replace('"', "\"\""))
            } else {
                s.to_string()
            }
        }

        match event {
            Event::NewJob(job) => format!(
                "{timestamp},new_job,{},{},{},{}",
                job.job, job.height, job.difficulty, job.clean
            ),
            Event::Share(share) => {
                let (status, detail, share_diff) = match &share.result {
                    ShareResult::Valid(accepted) => (
                        "valid",
                        accepted.block_type.to_string(),
                        accepted.share_diff.to_string(),
                    ),
                    ShareResult::Invalid { error } => ("invalid", error.clone(), String::new()),
                };

                format!(
                    "{timestamp},share,{},{},{},{},{},{status},{},{share_diff}",
                    share.job,
                    share.ip,
                    quote_if_needed(share.addr_primary.as_deref().unwrap_or_default()),
                    quote_if_needed(share.addr_auxiliary.as_deref().unwrap_or_default()),
                    share.difficulty,
                    quote_if_needed(&detail),
                )
            }
            Event::Client(client) => format!(
                "{timestamp},client,{},{},{},{},{}",
                client.session,
                client.ip,
                client.port,
                client.event,
                client
                    .difficulty
                    .map(|difficulty| difficulty.to_string())
                    .unwrap_or_default()
            ),
            Event::Block(block) => format!(
                "{timestamp},block,{},{},{},{},{}",
                block.block_type,
                block.height,
                block.hash,
                block.accepted,
                quote_if_needed(block.error.as_deref().unwrap_or_default())
            ),
        }
    }
}

#[async_trait]
impl EventSink for FileSink {
    async fn record(&mut self, event: &Event) -> Result {
        let line = match self.format {
            FileFormat::Json => serde_json::to_string(event)?,
            FileFormat::Csv => Self::to_csv(event, unix_now()),
        };

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        Ok(())
    }

    async fn flush(&mut self) -> Result {
        self.writer.flush().await?;
        Ok(())
    }
}
