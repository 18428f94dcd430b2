//! sshmux command line
//!
//! Thin composition root over the library: loads the host directory, builds
//! one `SessionManager` and drives it from the subcommands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use sshmux::config::{
    session_options_for, HostDirectory, HostsFile, KeyFileResolver, SshConfig,
};
use sshmux::launcher::TerminalLauncher;
use sshmux::{
    AbortController, CommandError, CommandSpec, EventFilter, RusshConnector, SessionEvent,
    SessionManager,
};

#[derive(Parser, Debug)]
#[command(name = "sshmux", version, about = "Run commands on many hosts over SSH")]
struct Cli {
    /// Hosts file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command on one or more hosts
    Run {
        /// Target host id (repeatable)
        #[arg(short = 'H', long = "host", required = true)]
        hosts: Vec<String>,

        /// Working directory on the remote side
        #[arg(long)]
        cwd: Option<String>,

        /// Command timeout in milliseconds; 0 disables it
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Queue priority; higher runs first
        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i32>,

        /// Environment variable for the command (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// List known hosts
    Hosts,

    /// Open an interactive ssh session in a terminal window
    Open { host: String },
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

/// Explicit hosts file, then the default hosts file, then `~/.ssh/config`
async fn load_directory(explicit: Option<PathBuf>) -> Result<Box<dyn HostDirectory>> {
    if let Some(path) = explicit {
        return Ok(Box::new(HostsFile::load(&path).await?));
    }

    let default_path = HostsFile::default_path()?;
    if let Some(file) = HostsFile::load_if_exists(&default_path).await? {
        return Ok(Box::new(file));
    }

    let ssh_config = SshConfig::default_path()?;
    debug!("Falling back to {:?}", ssh_config);
    Ok(Box::new(SshConfig::load(&ssh_config).await?))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let directory = load_directory(cli.config).await?;

    match cli.command {
        Commands::Hosts => {
            for host in directory.hosts() {
                let port = host.port.map(|p| format!(":{}", p)).unwrap_or_default();
                println!("{:<20} {}@{}{}  {}", host.id, host.user(), host.address(), port, host.label());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Open { host } => {
            let entry = directory
                .lookup(&host)
                .with_context(|| format!("Unknown host: {}", host))?;
            let mut target = format!("{}@{}", entry.user(), entry.address());
            if let Some(port) = entry.port {
                target = format!("ssh://{}:{}", target, port);
            }
            let terminal = TerminalLauncher::new().open_ssh(&target)?;
            info!("Opened {} in {:?}", host, terminal);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            hosts,
            cwd,
            timeout_ms,
            priority,
            env,
            command,
        } => {
            let spec = CommandSpec::new(command.join(" "));
            let spec = env.into_iter().fold(spec, |spec, (k, v)| spec.with_env(k, v));
            let spec = match cwd {
                Some(dir) => spec.with_cwd(dir),
                None => spec,
            };
            let spec = match timeout_ms {
                Some(ms) => spec.with_timeout_ms(i64::try_from(ms).unwrap_or(i64::MAX)),
                None => spec,
            };
            let spec = match priority {
                Some(p) => spec.with_priority(p),
                None => spec,
            };
            run(directory.as_ref(), hosts, spec).await
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Stream {
    Stdout,
    Stderr,
}

/// Host-prefixed output lines. A partial line is held until the rest of it
/// arrives or its command ends.
#[derive(Debug, Default)]
struct HostLines {
    partial: HashMap<(String, String, Stream), String>,
}

impl HostLines {
    fn push(&mut self, host: &str, command: &str, stream: Stream, chunk: &str) -> Vec<(Stream, String)> {
        let key = (host.to_string(), command.to_string(), stream);
        let mut pending = self.partial.remove(&key).unwrap_or_default();
        pending.push_str(chunk);

        let mut ready = Vec::new();
        while let Some(end) = pending.find('\n') {
            let line: String = pending.drain(..=end).collect();
            ready.push((stream, prefixed(host, &line)));
        }
        if !pending.is_empty() {
            self.partial.insert(key, pending);
        }
        ready
    }

    /// Flush what is left of a finished command
    fn finish(&mut self, host: &str, command: &str) -> Vec<(Stream, String)> {
        [Stream::Stdout, Stream::Stderr]
            .into_iter()
            .filter_map(|stream| {
                self.partial
                    .remove(&(host.to_string(), command.to_string(), stream))
                    .map(|rest| (stream, prefixed(host, &rest)))
            })
            .collect()
    }

    fn drain(&mut self) -> Vec<(Stream, String)> {
        let mut rest: Vec<_> = self.partial.drain().collect();
        rest.sort_by(|a, b| a.0.cmp(&b.0));
        rest.into_iter()
            .map(|((host, _, stream), text)| (stream, prefixed(&host, &text)))
            .collect()
    }
}

fn prefixed(host: &str, line: &str) -> String {
    format!("[{}] {}", host, line.trim_end_matches(|c| c == '\n' || c == '\r'))
}

fn print_lines(lines: Vec<(Stream, String)>) {
    for (stream, line) in lines {
        match stream {
            Stream::Stdout => println!("{}", line),
            Stream::Stderr => eprintln!("{}", line),
        }
    }
}

async fn run(directory: &dyn HostDirectory, hosts: Vec<String>, spec: CommandSpec) -> Result<ExitCode> {
    if hosts.is_empty() {
        bail!("no hosts given");
    }

    let manager = SessionManager::new(Arc::new(RusshConnector::new()));
    let resolver = KeyFileResolver::new();

    let lines = Arc::new(Mutex::new(HostLines::default()));
    let output = manager.subscribe(EventFilter::new().event("command:*"), {
        let lines = lines.clone();
        move |event| {
            let mut lines = lines.lock();
            let ready = match event {
                SessionEvent::Stdout { host_id, command_id, chunk } => {
                    lines.push(host_id, command_id, Stream::Stdout, chunk)
                }
                SessionEvent::Stderr { host_id, command_id, chunk } => {
                    lines.push(host_id, command_id, Stream::Stderr, chunk)
                }
                SessionEvent::Ended { host_id, command_id, .. } => lines.finish(host_id, command_id),
                _ => Vec::new(),
            };
            print_lines(ready);
        }
    });

    let abort = AbortController::new();
    let interrupt = tokio::spawn({
        let abort = abort.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling commands");
                abort.abort();
            }
        }
    });

    let runs = hosts.iter().map(|host| {
        let spec = spec.clone().with_abort(abort.signal());
        let manager = &manager;
        let resolver = &resolver;
        async move {
            let options = session_options_for(directory, resolver, host).await?;
            let result = manager.run_command(host, options, spec).await?;
            anyhow::Ok(result)
        }
    });
    let results = join_all(runs).await;

    interrupt.abort();
    output.unsubscribe();
    print_lines(lines.lock().drain());
    manager.shutdown_all().await;

    let mut failed = 0;
    for (host, result) in hosts.iter().zip(results) {
        match result {
            Ok(result) if result.success() => {
                debug!("[{}] finished in {}ms", host, result.duration_ms());
            }
            Ok(result) => {
                failed += 1;
                match (&result.code, &result.signal) {
                    (_, Some(signal)) => eprintln!("[{}] killed by signal {}", host, signal),
                    (Some(code), None) => eprintln!("[{}] exited with code {}", host, code),
                    (None, None) => eprintln!("[{}] exited without status", host),
                }
            }
            Err(err) => {
                failed += 1;
                match err.downcast_ref::<CommandError>() {
                    Some(CommandError::Cancelled { reason, .. }) => {
                        eprintln!("[{}] cancelled ({})", host, reason)
                    }
                    _ => eprintln!("[{}] error: {:#}", host, err),
                }
            }
        }
    }

    if failed > 0 {
        eprintln!("{} of {} hosts failed", failed, hosts.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
