use std::fmt::Write as _;
use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dsipc_protocol::status::status_name;
use dsipc_protocol::{command_name, command_set_name, AdvertiseFrame, IpcHeader, Reply};
use dsipc_server::PortConfig;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    event: &'static str,
    command: &'a str,
    ok: bool,
    status: String,
    status_name: &'static str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_reply(command_set: u8, command_id: u8, reply: &Reply, format: OutputFormat) {
    let (ok, payload): (bool, &[u8]) = match reply {
        Reply::Ok(payload) => (true, payload.as_ref()),
        Reply::Error(_) => (false, &[]),
    };
    let status = reply.status();
    let out = ReplyOutput {
        event: "reply",
        command: command_name(command_set, command_id),
        ok,
        status: status.map(hresult).unwrap_or_default(),
        status_name: status.map(status_name).unwrap_or(""),
        payload_size: payload.len(),
        payload: hex_preview(payload),
        timestamp: now_unix_seconds(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            vec!["COMMAND", "RESULT", "STATUS", "SIZE", "PAYLOAD"],
            vec![vec![
                out.command.to_string(),
                if ok { "OK" } else { "ERROR" }.to_string(),
                format!("{} {}", out.status, out.status_name).trim().to_string(),
                out.payload_size.to_string(),
                out.payload.clone(),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "{} -> {} status={} ({}) size={}",
            out.command,
            if ok { "OK" } else { "ERROR" },
            out.status,
            out.status_name,
            out.payload_size
        ),
    }
}

#[derive(Serialize)]
struct CommandOutput<'a> {
    event: &'static str,
    command_set: u8,
    command_set_name: &'a str,
    command_id: u8,
    command: &'a str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_command(header: &IpcHeader, payload: &[u8], format: OutputFormat) {
    let out = CommandOutput {
        event: "command",
        command_set: header.command_set,
        command_set_name: command_set_name(header.command_set),
        command_id: header.command_id,
        command: command_name(header.command_set, header.command_id),
        payload_size: payload.len(),
        payload: hex_preview(payload),
        timestamp: now_unix_seconds(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            vec!["SET", "ID", "COMMAND", "SIZE", "PAYLOAD"],
            vec![vec![
                format!("0x{:02X} {}", out.command_set, out.command_set_name),
                format!("0x{:02X}", out.command_id),
                out.command.to_string(),
                out.payload_size.to_string(),
                out.payload.clone(),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "command {} (set=0x{:02X} id=0x{:02X}) size={}",
            out.command, out.command_set, out.command_id, out.payload_size
        ),
    }
}

#[derive(Serialize)]
struct AdvertiseOutput {
    event: &'static str,
    cookie: String,
    pid: u64,
    timestamp: String,
}

pub fn print_advertise(frame: &AdvertiseFrame, format: OutputFormat) {
    let out = AdvertiseOutput {
        event: "advertise",
        cookie: frame.cookie.to_string(),
        pid: frame.pid,
        timestamp: now_unix_seconds(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            vec!["PID", "COOKIE"],
            vec![vec![out.pid.to_string(), out.cookie.clone()]],
        ),
        OutputFormat::Pretty => println!("advertise pid={} cookie={}", out.pid, out.cookie),
    }
}

#[derive(Serialize)]
struct PortOutput {
    path: String,
    kind: &'static str,
    suspend: &'static str,
}

#[derive(Serialize)]
struct PortsOutput {
    event: &'static str,
    pid: u32,
    ports: Vec<PortOutput>,
}

pub fn print_ports(ports: &[PortConfig], format: OutputFormat) {
    let out = PortsOutput {
        event: "listening",
        pid: std::process::id(),
        ports: ports
            .iter()
            .map(|port| PortOutput {
                path: port.path.display().to_string(),
                kind: port.kind.as_str(),
                suspend: port.suspend.as_str(),
            })
            .collect(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            vec!["PATH", "MODE", "SUSPEND"],
            out.ports
                .iter()
                .map(|p| vec![p.path.clone(), p.kind.to_string(), p.suspend.to_string()])
                .collect(),
        ),
        OutputFormat::Pretty => {
            for port in &out.ports {
                println!("port {} ({}, {})", port.path, port.kind, port.suspend);
            }
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    event: &'a str,
    detail: &'a str,
    timestamp: String,
}

pub fn print_event(event: &str, detail: &str, format: OutputFormat) {
    let out = EventOutput {
        event,
        detail,
        timestamp: now_unix_seconds(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => println!("{event}: {detail}"),
    }
}

/// `0x8013_1384` style, as status codes are usually quoted.
pub fn hresult(code: u32) -> String {
    format!("0x{code:08X}")
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

fn hex_preview(payload: &[u8]) -> String {
    const LIMIT: usize = 64;
    let mut out = String::with_capacity(payload.len().min(LIMIT) * 2 + 3);
    for byte in payload.iter().take(LIMIT) {
        let _ = write!(out, "{byte:02x}");
    }
    if payload.len() > LIMIT {
        out.push_str("...");
    }
    out
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_preview_truncates_long_payloads() {
        assert_eq!(hex_preview(&[0x01, 0xab]), "01ab");
        let long = vec![0u8; 100];
        let preview = hex_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), 64 * 2 + 3);
    }

    #[test]
    fn hresult_is_zero_padded() {
        assert_eq!(hresult(0), "0x00000000");
        assert_eq!(hresult(0x8013_1384), "0x80131384");
    }
}
