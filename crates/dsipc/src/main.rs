mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "dsipc", version, about = "Diagnostics IPC server and client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand_with_hex_ids() {
        let cli = Cli::try_parse_from([
            "dsipc",
            "send",
            "/tmp/test.sock",
            "--command-set",
            "0x04",
            "--command-id",
            "1",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.command_set, 4);
                assert_eq!(args.command_id, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "dsipc",
            "send",
            "/tmp/test.sock",
            "--command-set",
            "2",
            "--command-id",
            "1",
            "--hex",
            "00ff",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_monitor_subcommand() {
        let cli = Cli::try_parse_from(["dsipc", "monitor", "/tmp/m.sock", "--resume", "--count", "2"])
            .expect("monitor args should parse");
        assert!(matches!(cli.command, Command::Monitor(_)));
    }

    #[test]
    fn parses_serve_ports() {
        let cli = Cli::try_parse_from([
            "dsipc",
            "serve",
            "--ports",
            "/tmp/a.sock,listen",
            "--no-default-port",
        ])
        .expect("serve args should parse");
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.ports.as_deref(), Some("/tmp/a.sock,listen"));
                assert!(args.no_default_port);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
