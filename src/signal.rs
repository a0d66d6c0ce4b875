use eyre::{Context, Result};
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Termination signals that stop the service.
#[derive(Debug)]
pub struct Signals {
    int: Signal,
    term: Signal,
}

impl Signals {
    pub fn new() -> Result<Self> {
        Ok(Self {
            int: signal(SignalKind::interrupt()).context("SIGINT")?,
            term: signal(SignalKind::terminate()).context("SIGTERM")?,
        })
    }

    /// Wait for SIGINT or SIGTERM and return the name of the one received.
    pub async fn wait_terminate(&mut self) -> &'static str {
        tokio::select! {
            _ = self.int.recv() => "SIGINT",
            _ = self.term.recv() => "SIGTERM",
        }
    }
}
