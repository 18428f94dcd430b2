//! Terminal Launcher
//!
//! Opens an interactive `ssh` in whichever terminal emulator is installed.

use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;

/// How a terminal expects the command it should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecFlag {
    /// `-e cmd args...`
    Dash,
    /// `-- cmd args...`
    DoubleDash,
    /// `cmd args...`
    Inline,
}

/// One terminal emulator to try
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalCandidate {
    pub program: String,
    pub flag: ExecFlag,
}

impl TerminalCandidate {
    pub fn new(program: impl Into<String>, flag: ExecFlag) -> Self {
        Self {
            program: program.into(),
            flag,
        }
    }

    fn args(&self, command: &[String]) -> Vec<String> {
        let mut args = match self.flag {
            ExecFlag::Dash => vec!["-e".to_string()],
            ExecFlag::DoubleDash => vec!["--".to_string()],
            ExecFlag::Inline => Vec::new(),
        };
        args.extend(command.iter().cloned());
        args
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("No terminal emulator available")]
    NoTerminalAvailable,

    #[error("Nothing to run")]
    EmptyCommand,
}

/// Tries terminal emulators in order until one starts
#[derive(Debug, Clone)]
pub struct TerminalLauncher {
    candidates: Vec<TerminalCandidate>,
}

impl Default for TerminalLauncher {
    fn default() -> Self {
        use ExecFlag::*;
        let candidates = [
            ("foot", Dash),
            ("gnome-terminal", DoubleDash),
            ("konsole", Dash),
            ("xterm", Dash),
            ("alacritty", Dash),
            ("kitty", Inline),
            ("terminator", Dash),
            ("xfce4-terminal", Dash),
            ("mate-terminal", Dash),
            ("lxterminal", Dash),
        ]
        .into_iter()
        .map(|(program, flag)| TerminalCandidate::new(program, flag))
        .collect();
        Self { candidates }
    }
}

impl TerminalLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom candidate list
    pub fn with_candidates(candidates: Vec<TerminalCandidate>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[TerminalCandidate] {
        &self.candidates
    }

    /// Open a terminal running `ssh <target>`
    pub fn open_ssh(&self, target: &str) -> Result<PathBuf, LaunchError> {
        self.launch(&["ssh".to_string(), target.to_string()])
    }

    /// Spawn the first available terminal running `command`.
    /// Returns the terminal that was started.
    pub fn launch(&self, command: &[String]) -> Result<PathBuf, LaunchError> {
        if command.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }

        for candidate in &self.candidates {
            let Ok(path) = which::which(&candidate.program) else {
                debug!("Terminal {} not installed", candidate.program);
                continue;
            };

            let spawned = Command::new(&path)
                .args(candidate.args(command))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();

            match spawned {
                Ok(child) => {
                    info!("Opened {} (pid {})", candidate.program, child.id());
                    return Ok(path);
                }
                Err(e) => warn!("Failed to start {}: {}", candidate.program, e),
            }
        }

        Err(LaunchError::NoTerminalAvailable)
    }
}
