//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

pub mod mock_backend;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Temp workspace with a session file, isolated from the user's config dir.
pub struct Workspace {
    pub dir: TempDir,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.path("run")
    }

    pub fn write(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent directory");
        }
        std::fs::write(&path, bytes).expect("write file");
        path
    }

    pub fn session(&self, role: &str) -> PathBuf {
        let body = format!(
            r#"{{"id":"u-1","role":"{role}","display_name":"Test User","auth_token":"tok-test"}}"#
        );
        self.write("session.json", body.as_bytes())
    }

    /// Run `rfpflow` with the given base URL and session.
    pub fn rfpflow(&self, api_url: &str, session: Option<&Path>, args: &[&str]) -> Output {
        let mut command = Command::new(env!("CARGO_BIN_EXE_rfpflow"));
        command
            .env_remove("RFPFLOW_API_URL")
            .env_remove("RFPFLOW_SESSION")
            .env_remove("RFPFLOW_LOG")
            .env("XDG_CONFIG_HOME", self.path("xdg"))
            .env("HOME", self.path("home"))
            .arg("--api-url")
            .arg(api_url);
        if let Some(session) = session {
            command.arg("--session").arg(session);
        }
        command.args(args);
        command.output().expect("run rfpflow")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
