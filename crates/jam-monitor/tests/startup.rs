//! Startup behaviour of the `jam-monitor` binary.

use std::io::ErrorKind;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

#[test]
fn test_missing_device_exits_1_without_notifying() {
    let tmp = TempDir::new().expect("tempdir");

    // Stands in for the webhook; any request would show up as a connection.
    let webhook = TcpListener::bind("127.0.0.1:0").expect("bind webhook");
    webhook.set_nonblocking(true).expect("nonblocking");
    let url = format!("http://{}/hook", webhook.local_addr().expect("addr"));

    let device = tmp.path().join("ttyACM-missing");
    let output = tmp.path().join("data").join("output");
    let db_path = tmp.path().join("db").join("jam.db");

    let executable = PathBuf::from(env!("CARGO_BIN_EXE_jam-monitor"));
    let result = Command::new(executable)
        .arg("--config")
        .arg(tmp.path().join("absent.yml"))
        .arg("--port")
        .arg(&device)
        .arg("--output")
        .arg(&output)
        .arg("--db_path")
        .arg(&db_path)
        .arg("--slack_url")
        .arg(&url)
        .env_remove("DEBUG")
        .output()
        .expect("run jam-monitor");

    assert_eq!(result.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("uBlox device missing!"), "{stderr}");
    assert!(stderr.contains(&*device.to_string_lossy()), "{stderr}");

    match webhook.accept() {
        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
        other => panic!("webhook was contacted: {other:?}"),
    }

    // The device check runs before any directory or store is created.
    assert!(!tmp.path().join("data").exists());
    assert!(!tmp.path().join("db").exists());
}

#[test]
fn test_config_file_port_wins_over_flag() {
    let tmp = TempDir::new().expect("tempdir");
    let file_device = tmp.path().join("ttyFILE0");
    let config = tmp.path().join("config.yml");
    std::fs::write(&config, format!("port: {}\n", file_device.display())).expect("write config");

    let executable = PathBuf::from(env!("CARGO_BIN_EXE_jam-monitor"));
    let result = Command::new(executable)
        .arg("--config")
        .arg(&config)
        .arg("--port")
        .arg("/dev/null")
        .arg("--output")
        .arg(tmp.path().join("data").join("output"))
        .env_remove("DEBUG")
        .output()
        .expect("run jam-monitor");

    // `/dev/null` exists, so failing here proves the file's port was used.
    assert_eq!(result.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains(&*file_device.to_string_lossy()), "{stderr}");
}
