use tokio_util::sync::CancellationToken;

/// Replaces the self-pipe-of-file-descriptors pattern for graceful
/// shutdown with an explicit, clonable signal object. `main` owns the
/// root token; every spawned task holds a clone and checks it at its own
/// `select!` points instead of reading a shared global.
#[derive(Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `trigger()` has been called. Meant to be raced in a
    /// `select!` alongside a task's normal I/O awaits.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Installs SIGINT/SIGTERM handlers that call `trigger()` on this
    /// signal. Spawned as a background task; returns immediately.
    pub fn install_os_signal_handlers(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, shutting down");
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                }
            }
            signal.trigger();
        });
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn triggered_resolves_after_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        signal.trigger();
        assert!(signal.is_triggered());
        signal.triggered().await;
    }
}
