//! Daemon signal handling
//!
//! - SIGTERM/SIGINT: stop every active unit and exit
//! - SIGHUP: reload unit files
//! - SIGUSR1: dump unit states to the log

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;

/// Signals that unitd handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// Shutdown request (SIGTERM)
    Term,
    /// Interrupt (SIGINT, Ctrl+C)
    Int,
    /// Hangup (SIGHUP) - reload unit files
    Hup,
    /// User signal 1 (SIGUSR1) - state dump
    Usr1,
}

impl DaemonSignal {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Term | Self::Int)
    }
}

pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
    sigusr1: Signal,
}

impl SignalHandler {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
            sigusr1: signal(SignalKind::user_defined1())?,
        })
    }

    /// Wait for the next signal
    pub async fn wait(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigterm.recv() => DaemonSignal::Term,
            _ = self.sigint.recv() => DaemonSignal::Int,
            _ = self.sighup.recv() => DaemonSignal::Hup,
            _ = self.sigusr1.recv() => DaemonSignal::Usr1,
        }
    }

    /// Spawn a task that forwards signals to a channel
    pub fn spawn_forwarder(mut self) -> mpsc::Receiver<DaemonSignal> {
        let (tx, rx) = mpsc::channel(8);

        tokio::spawn(async move {
            loop {
                let sig = self.wait().await;
                if tx.send(sig).await.is_err() {
                    break;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signals() {
        assert!(DaemonSignal::Term.is_shutdown());
        assert!(DaemonSignal::Int.is_shutdown());
        assert!(!DaemonSignal::Hup.is_shutdown());
        assert!(!DaemonSignal::Usr1.is_shutdown());
    }

    #[tokio::test]
    async fn test_forwards_hangup() {
        let mut rx = SignalHandler::new().unwrap().spawn_forwarder();
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).unwrap();

        let sig = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(sig, Some(DaemonSignal::Hup));
    }
}
