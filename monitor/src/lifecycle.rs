//! Process lifecycle: one cancellation signal fanned out to every worker.
//!
//! Workers stop accepting new block jobs when the token fires but let the
//! in-flight handler finish; the progress snapshot is written afterwards, so
//! it reflects the last fully-handled block per chain.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    token: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Listen for termination signals and cancel the shared token on the
    /// first one.
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received, stopping workers");
            token.cancel();
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!("failed to install SIGTERM handler: {err:#}");
            return std::future::pending().await;
        },
    };
    let mut sigusr1 = signal(SignalKind::user_defined1()).ok();
    let mut sigusr2 = signal(SignalKind::user_defined2()).ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
        _ = async {
            match sigusr1.as_mut() {
                Some(s) => { s.recv().await; },
                None => std::future::pending().await,
            }
        } => {},
        _ = async {
            match sigusr2.as_mut() {
                Some(s) => { s.recv().await; },
                None => std::future::pending().await,
            }
        } => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {err:#}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_fans_out() {
        let lifecycle = Lifecycle::new();
        let token = lifecycle.token();
        assert!(!lifecycle.is_shutting_down());

        let waiter = tokio::spawn(async move { token.cancelled().await });
        lifecycle.shutdown();
        waiter.await.unwrap();
        assert!(lifecycle.is_shutting_down());
    }
}
