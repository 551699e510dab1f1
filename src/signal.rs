use {super::*, tokio::signal::ctrl_c};

/// Returns a token cancelled on Ctrl-C or SIGTERM.
pub(crate) fn setup_signal_handler() -> Result<CancellationToken> {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c() => {
                info!("Received shutdown signal (Ctrl-C / SIGINT)");
            }
            _ = sigterm.recv() => {
                info!("Received shutdown signal (SIGTERM)");
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c().await.ok();
            info!("Received shutdown signal (Ctrl-C)");
        }

        cancel_clone.cancel();
    });

    Ok(cancel)
}
