use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::VirusScanSettings;

/// Outcome of an external malware scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirusVerdict {
    Clean,
    Infected(String),
}

/// Hook for an external virus scanner. Pass/fail only.
pub trait VirusScanner: Send + Sync {
    fn scan(&self, archive_path: &Path) -> std::io::Result<VirusVerdict>;
}

/// Runs a configured command with the archive path appended.
/// Exit status 0 means clean; anything else is treated as infected.
pub struct CommandVirusScanner {
    command: String,
    args: Vec<String>,
}

impl CommandVirusScanner {
    #[must_use]
    pub fn new(settings: &VirusScanSettings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
        }
    }
}

impl VirusScanner for CommandVirusScanner {
    fn scan(&self, archive_path: &Path) -> std::io::Result<VirusVerdict> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(archive_path)
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            return Ok(VirusVerdict::Clean);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("scanner exited with {}", output.status));
        Ok(VirusVerdict::Infected(detail))
    }
}
