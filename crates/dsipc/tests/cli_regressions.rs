#![cfg(all(unix, feature = "cli"))]

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use dsipc::protocol::command::eventpipe;
use dsipc::protocol::status::S_OK;
use dsipc::protocol::{read_reply, CommandSet, IpcMessage};
use dsipc::server::{DiagnosticsServer, Handlers, StaticConfig};
use dsipc::transport::{IpcStream, UnixDomainSocket};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/dsipccli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn dsipc() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_dsipc"));
    command
        .env_remove("DOTNET_DiagnosticPorts")
        .env_remove("DOTNET_EnableDiagnostics")
        .env_remove("DOTNET_DefaultDiagnosticPortSuspend")
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json");
    command
}

fn wait_for_connect(path: &Path, timeout: Duration) -> io::Result<IpcStream> {
    let start = Instant::now();
    loop {
        match UnixDomainSocket::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if start.elapsed() >= timeout {
                    return Err(io::Error::other(format!("connect timeout: {err}")));
                }
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

#[test]
fn serve_answers_commands_and_send_reports_errors() {
    let dir = unique_temp_dir("serve");
    let sock_path = dir.join("diag.sock");

    let mut child = dsipc()
        .arg("serve")
        .arg("--ports")
        .arg(format!("{},listen,nosuspend", sock_path.display()))
        .arg("--no-default-port")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let mut stream =
        wait_for_connect(&sock_path, Duration::from_secs(3)).expect("client should connect");
    IpcMessage::new(CommandSet::EventPipe.into(), eventpipe::STOP_TRACING, vec![1, 2, 3])
        .unwrap()
        .send(&mut stream)
        .expect("command should send");
    let reply = read_reply(&mut stream).expect("reply should decode");
    assert_eq!(reply.status(), Some(S_OK));

    let output = dsipc()
        .arg("send")
        .arg(&sock_path)
        .arg("--command-set")
        .arg("0x42")
        .arg("--command-id")
        .arg("0")
        .output()
        .expect("send command should run");
    assert_eq!(output.status.code(), Some(1));
    let printed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send output should be json");
    assert_eq!(printed["ok"], false);
    assert_eq!(printed["status"], "0x80131385");

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn monitor_resumes_paused_runtime() {
    let dir = unique_temp_dir("monitor");
    let monitor_path = dir.join("monitor.sock");

    let child = dsipc()
        .arg("monitor")
        .arg(&monitor_path)
        .arg("--resume")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("monitor command should start");

    let start = Instant::now();
    while !monitor_path.exists() {
        assert!(start.elapsed() < Duration::from_secs(3), "monitor never bound");
        thread::sleep(Duration::from_millis(25));
    }

    let server = DiagnosticsServer::init(
        &StaticConfig::with_ports(format!("{},connect,suspend", monitor_path.display())),
        Handlers::default(),
    )
    .expect("server should start");

    let (tx, rx) = mpsc::channel();
    let server = std::sync::Arc::new(server);
    let startup = {
        let server = std::sync::Arc::clone(&server);
        thread::spawn(move || {
            server.pause_for_diagnostics_monitor();
            let _ = tx.send(());
        })
    };
    rx.recv_timeout(Duration::from_secs(5))
        .expect("monitor should resume startup");
    startup.join().unwrap();

    let output = child.wait_with_output().expect("monitor should exit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let advertise: serde_json::Value = stdout
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .find(|value: &serde_json::Value| value["event"] == "advertise")
        .expect("advertise event should be printed");
    assert_eq!(advertise["pid"], u64::from(std::process::id()));

    server.shutdown().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_dsipc"))
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("dsipc {}", env!("CARGO_PKG_VERSION")));
}
