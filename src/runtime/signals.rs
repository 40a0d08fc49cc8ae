//! Shutdown signalling.
//!
//! The main thread blocks in [`block_until_shutdown`] until SIGINT/SIGTERM
//! arrives or another thread calls [`ShutdownTrigger::request`] (the file
//! watcher does this to ask for a restart).

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::types::Result;

/// Why the process is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// A watched file changed; the process should re-execute itself.
    Restart,
    /// Requested programmatically.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownReason::Interrupt => "interrupt",
            ShutdownReason::Terminate => "terminate",
            ShutdownReason::Restart => "restart",
            ShutdownReason::Requested => "requested",
        })
    }
}

/// Cloneable handle that ends [`block_until_shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl ShutdownTrigger {
    /// A trigger and the receiver it wakes.
    pub fn new() -> (Self, watch::Receiver<Option<ShutdownReason>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Request shutdown. The first reason wins.
    pub fn request(&self, reason: ShutdownReason) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn requested(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }
}

async fn requested(mut rx: watch::Receiver<Option<ShutdownReason>>) -> ShutdownReason {
    match rx.wait_for(Option::is_some).await {
        Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
        // Every trigger dropped; only a signal can end the wait now.
        Err(_) => std::future::pending().await,
    }
}

/// Wait for a termination signal or a programmatic request.
#[cfg(unix)]
pub async fn shutdown_signal(rx: watch::Receiver<Option<ShutdownReason>>) -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "cannot install SIGTERM handler");
            None
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "cannot install SIGINT handler");
            None
        }
    };

    async fn next(sig: &mut Option<tokio::signal::unix::Signal>) {
        match sig {
            Some(sig) => {
                sig.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    tokio::select! {
        _ = next(&mut sigterm) => {
            tracing::info!("received SIGTERM");
            ShutdownReason::Terminate
        }
        _ = next(&mut sigint) => {
            tracing::info!("received SIGINT");
            ShutdownReason::Interrupt
        }
        reason = requested(rx) => reason,
    }
}

/// Wait for Ctrl-C or a programmatic request.
#[cfg(not(unix))]
pub async fn shutdown_signal(rx: watch::Receiver<Option<ShutdownReason>>) -> ShutdownReason {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                return std::future::pending().await;
            }
            tracing::info!("received Ctrl-C");
            ShutdownReason::Interrupt
        }
        reason = requested(rx) => reason,
    }
}

/// Block the calling thread on [`shutdown_signal`] using a current-thread
/// runtime.
pub fn block_until_shutdown(rx: watch::Receiver<Option<ShutdownReason>>) -> Result<ShutdownReason> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(shutdown_signal(rx)))
}
