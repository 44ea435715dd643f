use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod monitor;
pub mod resume;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host a diagnostics server that logs every command and answers OK.
    Serve(ServeArgs),
    /// Send one command to a listening port and print the reply.
    Send(SendArgs),
    /// Send ResumeRuntime to a listening port.
    Resume(ResumeArgs),
    /// Accept reverse connections from runtimes and print their advertise frames.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Resume(args) => resume::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Diagnostic port list: `path[,listen|connect][,suspend|nosuspend]` separated by `;`.
    #[arg(long, env = "DOTNET_DiagnosticPorts")]
    pub ports: Option<String>,
    /// Set to 0 to disable the server.
    #[arg(long, env = "DOTNET_EnableDiagnostics", default_value = "1")]
    pub enable_diagnostics: String,
    /// Suspend startup on the default listen port.
    #[arg(
        long,
        env = "DOTNET_DefaultDiagnosticPortSuspend",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub default_port_suspend: bool,
    /// Path of the default listen port (default: temp dir, named by pid).
    #[arg(long, value_name = "PATH", conflicts_with = "no_default_port")]
    pub default_port: Option<PathBuf>,
    /// Do not open the default listen port.
    #[arg(long)]
    pub no_default_port: bool,
    /// Skip the startup pause even when a port is in suspend mode.
    #[arg(long)]
    pub no_pause: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Command set (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u8)]
    pub command_set: u8,
    /// Command id (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u8)]
    pub command_id: u8,
    /// Raw string payload.
    #[arg(long, conflicts_with = "hex")]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with = "data")]
    pub hex: Option<String>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Send ResumeRuntime on every accepted connection.
    #[arg(long)]
    pub resume: bool,
    /// Exit after handling N connections.
    #[arg(long)]
    pub count: Option<usize>,
    /// Maximum time to wait for each advertise frame (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_u8(input: &str) -> Result<u8, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid byte value {input:?}: {err}"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u8_accepts_decimal_and_hex() {
        assert_eq!(parse_u8("4"), Ok(4));
        assert_eq!(parse_u8("0xFF"), Ok(0xFF));
        assert!(parse_u8("256").is_err());
        assert!(parse_u8("0xzz").is_err());
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }
}
