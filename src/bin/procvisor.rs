//! procvisor binary.
//!
//! Runs one program under supervision and serves the control plane.
//!
//! ```text
//! procvisor [OPTIONS] -- <program> [args..]
//! procvisor [OPTIONS] <settings.toml>
//! ```
//!
//! A single non-executable file argument is read as a TOML settings file.
//! Command-line options override values from the settings file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use procvisor::{
    Config, ExitPolicy, LogMode, ProcSignal, ProgramSpec, ReloadCoalescing, RestartBackoff,
    Supervisor,
};

#[derive(Parser, Debug)]
#[command(name = "procvisor", version, about = "Supervise a program behind a live web control plane")]
struct Cli {
    /// Listening interface.
    #[arg(long, env = "PROCVISOR_HOST")]
    host: Option<String>,

    /// Listening port.
    #[arg(short, long, env = "PROCVISOR_PORT")]
    port: Option<u16>,

    /// TOML settings file (same effect as passing it as the only argument).
    #[arg(short, long, env = "PROCVISOR_SETTINGS")]
    settings: Option<PathBuf>,

    /// Configuration file shown in the UI and watched (repeatable).
    #[arg(short = 'c', long = "config")]
    config_files: Vec<PathBuf>,

    /// Restart the program when a configuration file changes.
    #[arg(long)]
    restart_on_change: bool,

    /// What to do when the program exits on its own.
    #[arg(long, value_enum)]
    on_exit: Option<ExitPolicy>,

    /// Where program output goes.
    #[arg(long = "log", value_enum)]
    log_mode: Option<LogMode>,

    /// Lines kept in the log window.
    #[arg(long)]
    max_lines: Option<usize>,

    /// Signal used to stop the program on restart.
    #[arg(long)]
    stop_signal: Option<ProcSignal>,

    /// Milliseconds a stopping program may take before SIGKILL.
    #[arg(long)]
    restart_timeout_ms: Option<u64>,

    /// Minimum milliseconds between two state pushes.
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// Restarts per debounce window on configuration change.
    #[arg(long, value_enum)]
    coalescing: Option<ReloadCoalescing>,

    /// Program and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program: Vec<String>,
}

/// Contents of a settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Settings {
    host: Option<String>,
    port: Option<u16>,
    program: Vec<String>,
    cwd: Option<PathBuf>,
    /// `KEY=VALUE` entries (a list, since table keys are case-folded).
    env: Vec<String>,
    config_files: Vec<PathBuf>,
    restart_on_change: bool,
    on_exit: Option<ExitPolicy>,
    log: Option<LogMode>,
    max_lines: Option<usize>,
    stop_signal: Option<ProcSignal>,
    restart_timeout_ms: Option<u64>,
    throttle_ms: Option<u64>,
    signal_grace_ms: Option<u64>,
    debounce_ms: Option<u64>,
    coalescing: Option<ReloadCoalescing>,
    backoff: Option<RestartBackoff>,
}

impl Settings {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .build()
            .with_context(|| format!("reading settings file {}", path.display()))?;
        raw.try_deserialize()
            .with_context(|| format!("invalid settings file {}", path.display()))
    }

    /// Applies command-line overrides on top of the file.
    fn merge(mut self, cli: Cli) -> Self {
        if cli.host.is_some() {
            self.host = cli.host;
        }
        if cli.port.is_some() {
            self.port = cli.port;
        }
        if !cli.program.is_empty() {
            self.program = cli.program;
        }
        self.config_files.extend(cli.config_files);
        self.restart_on_change |= cli.restart_on_change;
        self.on_exit = cli.on_exit.or(self.on_exit);
        self.log = cli.log_mode.or(self.log);
        self.max_lines = cli.max_lines.or(self.max_lines);
        self.stop_signal = cli.stop_signal.or(self.stop_signal);
        self.restart_timeout_ms = cli.restart_timeout_ms.or(self.restart_timeout_ms);
        self.throttle_ms = cli.throttle_ms.or(self.throttle_ms);
        self.coalescing = cli.coalescing.or(self.coalescing);
        self
    }

    fn addr_parts(&self) -> (String, u16) {
        (
            self.host.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
            self.port.unwrap_or(8080),
        )
    }

    fn into_config(self) -> anyhow::Result<Config> {
        let mut words = self.program.into_iter();
        let Some(program) = words.next() else {
            bail!("no program to run (pass it after `--` or in a settings file)");
        };

        let mut spec = ProgramSpec::new(program, words);
        if let Some(dir) = self.cwd {
            spec = spec.with_cwd(dir);
        }
        for entry in &self.env {
            let Some((key, value)) = entry.split_once('=') else {
                bail!("invalid env entry {entry:?}, expected KEY=VALUE");
            };
            spec = spec.with_env(key, value);
        }

        let mut cfg = Config::new(spec);
        cfg.config_files = self.config_files;
        cfg.restart_on_change = self.restart_on_change;
        if let Some(v) = self.on_exit {
            cfg.on_exit = v;
        }
        if let Some(v) = self.log {
            cfg.log_mode = v;
        }
        if let Some(v) = self.max_lines {
            cfg.max_lines = v;
        }
        if let Some(v) = self.stop_signal {
            cfg.stop_signal = v;
        }
        if let Some(ms) = self.restart_timeout_ms {
            cfg.restart_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.throttle_ms {
            cfg.throttle = Duration::from_millis(ms);
        }
        if let Some(ms) = self.signal_grace_ms {
            cfg.signal_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = self.debounce_ms {
            cfg.debounce = Duration::from_millis(ms);
        }
        if let Some(v) = self.coalescing {
            cfg.coalescing = v;
        }
        if let Some(v) = self.backoff {
            cfg.backoff = v;
        }
        Ok(cfg)
    }
}

/// A lone argument naming an existing, non-executable file is a settings file.
fn settings_candidate(program: &[String]) -> Option<PathBuf> {
    let [only] = program else {
        return None;
    };
    let path = PathBuf::from(only);
    let meta = std::fs::metadata(&path).ok()?;
    if !meta.is_file() || is_executable(&meta) {
        return None;
    }
    Some(path)
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

fn resolve(mut cli: Cli) -> anyhow::Result<Settings> {
    let file = match cli.settings.take() {
        Some(path) => Some(path),
        None => settings_candidate(&cli.program).inspect(|_| cli.program.clear()),
    };
    let base = match file {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    Ok(base.merge(cli))
}

async fn listen_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let settings = resolve(Cli::parse())?;
    let (host, port) = settings.addr_parts();
    let addr = listen_addr(&host, port).await?;
    let cfg = settings.into_config()?;

    tracing::debug!(program = %cfg.program.command_line(), %addr, "starting");
    let code = procvisor::http::serve(Supervisor::builder(cfg).build(), addr)
        .await
        .context("supervisor failed")?;
    std::process::exit(code);
}
