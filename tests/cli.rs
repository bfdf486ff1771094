//! End-to-end checks of the `deskline` binary.
//!
//! Each test gets its own HOME and database so no real config is read.
//! Stdout is a pipe here, so every command answers in JSON.

use assert_cmd::Command;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

struct Env {
    home: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            home: TempDir::new().unwrap(),
        }
    }

    fn db(&self) -> PathBuf {
        self.home.path().join("deskline.db")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("deskline").unwrap();
        cmd.env("HOME", self.home.path())
            .env_remove("DESKLINE_DB")
            .env_remove("DESKLINE_USER")
            .env_remove("DESKLINE_REMOTE_ENDPOINT")
            .env_remove("DESKLINE_REMOTE_PROJECT")
            .env_remove("DESKLINE_REMOTE_API_KEY")
            .env_remove("RUST_LOG")
            .arg("--quiet")
            .arg("--db")
            .arg(self.db());
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap()
    }

    fn init(&self) {
        self.cmd()
            .args(["init", "--admin", "Mina", "--pin", "1234"])
            .assert()
            .success();
    }
}

fn last_stderr_json(stderr: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stderr);
    let line = text.lines().last().unwrap();
    serde_json::from_str(line).unwrap()
}

#[test]
fn version_reports_package_version() {
    let env = Env::new();
    let out = env.json(&["version"]);
    assert_eq!(out["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn commands_before_init_fail_with_not_initialized() {
    let env = Env::new();
    let assert = env.cmd().args(["ticket", "list"]).assert().code(2);
    let err = last_stderr_json(&assert.get_output().stderr);
    assert_eq!(err["error"]["code"], "NOT_INITIALIZED");
}

#[test]
fn init_seeds_admin_and_refuses_to_overwrite() {
    let env = Env::new();
    env.init();
    assert!(env.db().exists());

    env.cmd().args(["init"]).assert().code(2);

    let login = env.json(&["login", "mina", "1234"]);
    assert_eq!(login["name"], "Mina");
    assert_eq!(login["role"], "admin");
    assert!(login.get("pin").is_none());

    env.cmd().args(["login", "Mina", "0000"]).assert().code(4);
}

#[test]
fn ticket_lifecycle() {
    let env = Env::new();
    env.init();
    env.json(&["user", "add", "Ravish", "5678"]);

    let ticket = env.json(&[
        "ticket", "add", "Call back\nSend invoice", "--client", "Acme", "--priority", "urgent",
        "--assign", "ravish",
    ]);
    let id = ticket["id"].as_str().unwrap().to_string();
    assert_eq!(ticket["description"], "• Call back\n• Send invoice");
    assert_eq!(ticket["priority"], "High");
    assert_eq!(ticket["assignee"], "Ravish");
    assert_eq!(ticket["owner"], "Mina");

    let list = env.json(&["ticket", "list"]);
    assert_eq!(list["count"], 1);

    let moved = env.json(&["ticket", "move", &id, "Unassigned"]);
    assert_eq!(moved["clientName"], "Unassigned");

    let board = env.json(&["ticket", "board"]);
    assert_eq!(board["columns"][0]["client"], "Unassigned");
    assert_eq!(board["columns"][0]["tickets"][0]["id"], id.as_str());

    let closed = env.json(&["ticket", "status", &id, "done"]);
    assert_eq!(closed["status"], "Closed");

    let dashboard = env.json(&["dashboard"]);
    assert_eq!(dashboard["openTickets"], 0);

    env.json(&["ticket", "delete", &id]);
    env.cmd().args(["ticket", "delete", &id]).assert().code(3);
}

#[test]
fn deleting_a_call_removes_its_tickets() {
    let env = Env::new();
    env.init();

    let audio = env.home.path().join("call.wav");
    std::fs::write(&audio, b"RIFF....WAVE").unwrap();
    let call = env.json(&[
        "call",
        "add",
        "--client",
        "Acme",
        "--duration",
        "95",
        "--audio",
        audio.to_str().unwrap(),
    ]);
    let call_id = call["id"].as_str().unwrap().to_string();
    assert!(call["audioRef"].is_string());

    let ticket = env.json(&["ticket", "from-call", &call_id, "Follow up"]);
    assert_eq!(ticket["clientName"], "Acme");
    assert_eq!(ticket["duration"], 95);

    let copy = env.home.path().join("copy.wav");
    env.json(&["call", "export", &call_id, copy.to_str().unwrap()]);
    assert_eq!(std::fs::read(&copy).unwrap(), b"RIFF....WAVE");

    let deleted = env.json(&["call", "delete", &call_id]);
    assert_eq!(deleted["ticketsRemoved"], 1);
    assert_eq!(env.json(&["ticket", "list"])["count"], 0);
}

#[test]
fn agents_cannot_add_users() {
    let env = Env::new();
    env.init();
    env.json(&["user", "add", "Ravish", "5678"]);

    let assert = env
        .cmd()
        .args(["--as", "Ravish", "user", "add", "Eve", "0000"])
        .assert()
        .code(4);
    let err = last_stderr_json(&assert.get_output().stderr);
    assert_eq!(err["error"]["code"], "PERMISSION_DENIED");
}

#[test]
fn sync_status_with_in_process_remote() {
    let env = Env::new();
    env.init();

    let out = env
        .cmd()
        .env("DESKLINE_REMOTE_ENDPOINT", "memory://")
        .env("DESKLINE_REMOTE_PROJECT", "front-office")
        .args(["sync", "status"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let status: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(status["remote"], "memory");
    assert_eq!(status["connected"], true);
    assert_eq!(status["counts"]["users"], 1);
}
