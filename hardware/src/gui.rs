//! Launching the LibreVNA-GUI before connecting to it.
//!
//! The GUI must be running with its SCPI TCP server enabled before any
//! [`crate::librevna::ScpiDevice`] can connect. There is no readiness signal, so
//! the launcher waits a fixed delay after spawning the process.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{debug, info};

/// Wait after spawning before the GUI's TCP listener is assumed ready
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(1);

/// Starts the vendor GUI binary.
#[derive(Debug, Clone)]
pub struct GuiLauncher {
    program: PathBuf,
    args: Vec<String>,
    startup_delay: Duration,
}

impl GuiLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            startup_delay: DEFAULT_STARTUP_DELAY,
        }
    }

    /// Extra command line arguments, e.g. `--no-gui` for headless operation.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Spawn the GUI and block for the startup delay.
    ///
    /// The child is returned unsupervised; dropping it leaves the GUI running.
    pub fn launch(&self) -> std::io::Result<Child> {
        info!("Launching {}", self.program.display());
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        debug!(
            "GUI started with pid {}, waiting {:?}",
            child.id(),
            self.startup_delay
        );
        std::thread::sleep(self.startup_delay);
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_fails() {
        let launcher = GuiLauncher::new("/nonexistent/LibreVNA-GUI").startup_delay(Duration::ZERO);
        assert!(launcher.launch().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_waits_and_returns_child() {
        let launcher = GuiLauncher::new("sleep")
            .args(["5"])
            .startup_delay(Duration::from_millis(50));

        let start = std::time::Instant::now();
        let mut child = launcher.launch().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(child.try_wait().unwrap().is_none());
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
