use std::io;

#[cfg(unix)]
use tokio::signal::unix::{self, Signal, SignalKind};

/// Waits for the process to be asked to stop.
///
/// Handlers are installed on creation, a signal that arrives before `recv`
/// is awaited is not lost.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignal {
    /// Installs the handlers for SIGINT and SIGTERM.
    ///
    /// # Returns
    /// A new `ShutdownSignal` or an io error if a handler couldn't be installed.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            interrupt: unix::signal(SignalKind::interrupt())?,
            #[cfg(unix)]
            terminate: unix::signal(SignalKind::terminate())?,
        })
    }

    /// Waits for the next signal.
    ///
    /// # Returns
    /// The name of the signal received.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{process::Command, time::Duration};

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn names_the_signal_received() -> io::Result<()> {
        let mut signal = ShutdownSignal::new()?;

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()?;
        assert!(status.success());

        let name = timeout(Duration::from_secs(5), signal.recv()).await?;
        assert_eq!(name, "SIGTERM");

        Ok(())
    }
}
