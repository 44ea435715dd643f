//! Diagnostic port configuration.
//!
//! Ports come from a `;`-separated list of `address[,tag]*` entries.
//! Recognised tags (case-insensitive) are `listen`, `connect`, `suspend` and
//! `nosuspend`; an entry without tags is a suspending connect port.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

pub const ENV_ENABLE_DIAGNOSTICS: &str = "DOTNET_EnableDiagnostics";
pub const ENV_DIAGNOSTIC_PORTS: &str = "DOTNET_DiagnosticPorts";
pub const ENV_DEFAULT_PORT_SUSPEND: &str = "DOTNET_DefaultDiagnosticPortSuspend";

/// Whether the server listens for monitors or dials out to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Listen,
    Connect,
}

impl PortKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PortKind::Listen => "listen",
            PortKind::Connect => "connect",
        }
    }
}

/// Whether startup waits for a resume command from this port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendMode {
    Suspend,
    NoSuspend,
}

impl SuspendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SuspendMode::Suspend => "suspend",
            SuspendMode::NoSuspend => "nosuspend",
        }
    }
}

/// One configured diagnostic port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub path: PathBuf,
    pub kind: PortKind,
    pub suspend: SuspendMode,
}

impl PortConfig {
    pub fn listen(path: impl Into<PathBuf>, suspend: SuspendMode) -> Self {
        Self {
            path: path.into(),
            kind: PortKind::Listen,
            suspend,
        }
    }

    pub fn connect(path: impl Into<PathBuf>, suspend: SuspendMode) -> Self {
        Self {
            path: path.into(),
            kind: PortKind::Connect,
            suspend,
        }
    }
}

impl fmt::Display for PortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.path.display(),
            self.kind.as_str(),
            self.suspend.as_str()
        )
    }
}

/// Where configuration values come from.
pub trait ConfigSource {
    /// `false` disables the diagnostics server entirely.
    fn enable(&self) -> bool;

    /// Raw port list, if any.
    fn ports(&self) -> Option<String>;

    /// Suspend mode of the default listen port.
    fn default_port_suspend(&self) -> bool;

    /// Path of the default listen port; `None` disables it.
    fn default_port_path(&self) -> Option<PathBuf> {
        Some(default_listen_path())
    }
}

/// Reads the runtime's environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl ConfigSource for EnvConfig {
    fn enable(&self) -> bool {
        env_flag(ENV_ENABLE_DIAGNOSTICS).unwrap_or(true)
    }

    fn ports(&self) -> Option<String> {
        std::env::var(ENV_DIAGNOSTIC_PORTS)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    fn default_port_suspend(&self) -> bool {
        env_flag(ENV_DEFAULT_PORT_SUSPEND).unwrap_or(false)
    }
}

/// Fixed values, for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    pub enable: bool,
    pub ports: Option<String>,
    pub default_port_suspend: bool,
    pub default_port: Option<PathBuf>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            enable: true,
            ports: None,
            default_port_suspend: false,
            default_port: None,
        }
    }
}

impl StaticConfig {
    /// Only the given port list; no default listen port.
    pub fn with_ports(ports: impl Into<String>) -> Self {
        Self {
            ports: Some(ports.into()),
            ..Self::default()
        }
    }
}

impl ConfigSource for StaticConfig {
    fn enable(&self) -> bool {
        self.enable
    }

    fn ports(&self) -> Option<String> {
        self.ports.clone()
    }

    fn default_port_suspend(&self) -> bool {
        self.default_port_suspend
    }

    fn default_port_path(&self) -> Option<PathBuf> {
        self.default_port.clone()
    }
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    pub ports: Vec<PortConfig>,
    /// Port list as configured, kept for the startup pause notice.
    pub raw_ports: Option<String>,
    pub default_port_suspend: bool,
}

impl DiagnosticsConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let raw_ports = source.ports();
        let default_port_suspend = source.default_port_suspend();
        if !source.enable() {
            debug!("diagnostics disabled by configuration");
            return Self {
                enabled: false,
                ports: Vec::new(),
                raw_ports,
                default_port_suspend,
            };
        }

        let mut ports = keep_first_connect(parse_port_list(raw_ports.as_deref().unwrap_or("")));
        if let Some(path) = source.default_port_path() {
            let suspend = if default_port_suspend {
                SuspendMode::Suspend
            } else {
                SuspendMode::NoSuspend
            };
            ports.push(PortConfig::listen(path, suspend));
        }

        Self {
            enabled: true,
            ports,
            raw_ports,
            default_port_suspend,
        }
    }

    /// Text shown when startup has been paused for too long.
    pub fn pause_notice(&self) -> String {
        format!(
            "The runtime has been configured to pause during startup and is awaiting a \
             Diagnostics IPC ResumeStartup command from a Diagnostic Port.\n\
             {ENV_DIAGNOSTIC_PORTS}=\"{}\"\n\
             {ENV_DEFAULT_PORT_SUSPEND}={}",
            self.raw_ports.as_deref().unwrap_or(""),
            u8::from(self.default_port_suspend)
        )
    }
}

/// Parse a port list. Malformed entries are logged and skipped.
pub fn parse_port_list(list: &str) -> Vec<PortConfig> {
    list.split(';')
        .filter_map(|entry| parse_port_entry(entry.trim()))
        .collect()
}

fn parse_port_entry(entry: &str) -> Option<PortConfig> {
    if entry.is_empty() {
        return None;
    }
    let mut parts = entry.split(',');
    let address = parts.next().map(str::trim).unwrap_or("");
    if address.is_empty() {
        warn!(entry, "diagnostic port entry has no address, ignoring");
        return None;
    }

    let mut port = PortConfig::connect(address, SuspendMode::Suspend);
    for tag in parts.map(str::trim).filter(|tag| !tag.is_empty()) {
        match tag.to_ascii_lowercase().as_str() {
            "listen" => port.kind = PortKind::Listen,
            "connect" => port.kind = PortKind::Connect,
            "suspend" => port.suspend = SuspendMode::Suspend,
            "nosuspend" => port.suspend = SuspendMode::NoSuspend,
            _ => warn!(address, tag, "unknown diagnostic port tag, ignoring"),
        }
    }
    Some(port)
}

fn keep_first_connect(ports: Vec<PortConfig>) -> Vec<PortConfig> {
    let mut seen_connect = false;
    ports
        .into_iter()
        .filter(|port| {
            if port.kind != PortKind::Connect {
                return true;
            }
            if seen_connect {
                warn!(path = %port.path.display(), "only one connect port is supported, ignoring");
                return false;
            }
            seen_connect = true;
            true
        })
        .collect()
}

/// `$TMPDIR/dotnet-diagnostic-{pid}-{key}-socket`.
pub fn default_listen_path() -> PathBuf {
    default_listen_path_in(&std::env::temp_dir())
}

fn default_listen_path_in(dir: &Path) -> PathBuf {
    dir.join(format!(
        "dotnet-diagnostic-{}-{}-socket",
        std::process::id(),
        process_start_key()
    ))
}

/// Disambiguates recycled pids. Fixed for the lifetime of the process.
fn process_start_key() -> u64 {
    static KEY: OnceLock<u64> = OnceLock::new();
    *KEY.get_or_init(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

/// Runtime settings are hexadecimal integers; non-zero means on.
fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    match u32::from_str_radix(digits, 16) {
        Ok(parsed) => Some(parsed != 0),
        Err(_) => {
            warn!(name, value = trimmed, "ignoring malformed setting");
            None
        }
    }
}
