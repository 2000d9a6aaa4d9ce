//! Typed paths and JSON persistence for a run directory.
//!
//! A run directory holds one workflow run: `run.json` with the step records,
//! one JSON artifact per completed step, an append-only `history.jsonl` and a
//! `downloads/` folder. A process that changes the run holds `run.lock`.
use super::state::{now_epoch_ms, MacroStep, RunState};
use crate::error::WorkflowError;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `run.json` path.
    pub fn state_path(&self) -> PathBuf {
        self.root.join("run.json")
    }

    /// Return the `rfp.json` path (structured document from the upload).
    pub fn document_path(&self) -> PathBuf {
        self.root.join("rfp.json")
    }

    /// Return the `response.json` path (generated draft).
    pub fn response_path(&self) -> PathBuf {
        self.root.join("response.json")
    }

    /// Return the `edited.json` path (reviewed draft).
    pub fn edited_path(&self) -> PathBuf {
        self.root.join("edited.json")
    }

    /// Return the `proposal.json` path (finalized document handles).
    pub fn proposal_path(&self) -> PathBuf {
        self.root.join("proposal.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Return the `run.lock` path held while a process changes the run.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join("run.lock")
    }

    /// Artifact written when `step` completes.
    pub fn artifact_path(&self, step: MacroStep) -> PathBuf {
        match step {
            MacroStep::Upload => self.document_path(),
            MacroStep::Generate => self.response_path(),
            MacroStep::Edit => self.edited_path(),
            MacroStep::Finalize => self.proposal_path(),
        }
    }
}

/// One line of `history.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub ts_epoch_ms: u128,
    pub run_id: String,
    pub step: MacroStep,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
}

impl RunHistoryEntry {
    pub fn new(state: &RunState, step: MacroStep, event: &str) -> Result<Self> {
        Ok(Self {
            ts_epoch_ms: now_epoch_ms()?,
            run_id: state.run_id.clone(),
            step,
            event: event.to_string(),
            rfp_id: state.rfp_id.clone(),
            http_status: None,
            message: None,
            elapsed_ms: None,
        })
    }
}

/// Contents of `run.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    acquired_at_epoch_ms: u128,
}

/// Exclusive claim on a run directory; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[derive(Debug, Clone)]
pub struct RunStore {
    paths: RunPaths,
}

impl RunStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            paths: RunPaths::new(root),
        }
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn exists(&self) -> bool {
        self.paths.state_path().is_file()
    }

    pub fn load_state(&self) -> Result<RunState> {
        let state: RunState = self.read_json(&self.paths.state_path())?;
        state
            .validate()
            .with_context(|| format!("invalid run state in {}", self.paths.root().display()))?;
        Ok(state)
    }

    pub fn load_state_optional(&self) -> Result<Option<RunState>> {
        self.exists().then(|| self.load_state()).transpose()
    }

    pub fn save_state(&self, state: &RunState) -> Result<()> {
        self.write_json(&self.paths.state_path(), state)
    }

    pub fn read_artifact<T: DeserializeOwned>(&self, step: MacroStep) -> Result<T> {
        self.read_json(&self.paths.artifact_path(step))
    }

    pub fn write_artifact<T: Serialize>(&self, step: MacroStep, value: &T) -> Result<()> {
        self.write_json(&self.paths.artifact_path(step), value)
    }

    pub fn remove_artifact(&self, step: MacroStep) -> Result<()> {
        let path = self.paths.artifact_path(step);
        if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Remove every step artifact and the state file, keeping history.
    pub fn clear(&self) -> Result<()> {
        for step in MacroStep::ALL {
            self.remove_artifact(step)?;
        }
        let state = self.paths.state_path();
        if state.is_file() {
            fs::remove_file(&state).with_context(|| format!("remove {}", state.display()))?;
        }
        Ok(())
    }

    /// Append a history entry as JSONL.
    pub fn append_history(&self, entry: &RunHistoryEntry) -> Result<()> {
        let path = self.paths.history_path();
        self.ensure_root()?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        let line = serde_json::to_string(entry).context("serialize run history entry")?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        file.write_all(b"\n")
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn read_history(&self) -> Result<Vec<RunHistoryEntry>> {
        let path = self.paths.history_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("parse run history entry"))
            .collect()
    }

    /// Claim the run for this process.
    ///
    /// A lock left by a process that is no longer running is taken over; a
    /// live holder yields [`WorkflowError::RunInUse`].
    pub fn lock(&self) -> Result<RunLock> {
        self.ensure_root()?;
        let path = self.paths.lock_path();
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let holder = LockHolder {
                        pid: std::process::id(),
                        acquired_at_epoch_ms: now_epoch_ms()?,
                    };
                    let lock = RunLock { path: path.clone() };
                    let text = serde_json::to_string(&holder).context("serialize run lock")?;
                    file.write_all(text.as_bytes())
                        .with_context(|| format!("write {}", path.display()))?;
                    return Ok(lock);
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let holder = fs::read(&path)
                        .ok()
                        .and_then(|bytes| serde_json::from_slice::<LockHolder>(&bytes).ok());
                    match holder {
                        Some(holder) if !process_alive(holder.pid) => {
                            tracing::warn!(
                                lock = %path.display(),
                                pid = holder.pid,
                                "taking over run lock from a process that exited"
                            );
                            match fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                                Err(err) => {
                                    return Err(err)
                                        .with_context(|| format!("remove {}", path.display()))
                                }
                            }
                        }
                        Some(holder) => {
                            return Err(WorkflowError::RunInUse {
                                holder: format!("process {}", holder.pid),
                                lock: path,
                            }
                            .into())
                        }
                        None => {
                            return Err(WorkflowError::RunInUse {
                                holder: "another process".to_string(),
                                lock: path,
                            }
                            .into())
                        }
                    }
                }
                Err(err) => return Err(err).with_context(|| format!("create {}", path.display())),
            }
        }
        Err(anyhow!("could not lock {}", path.display()))
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(self.paths.root())
            .with_context(|| format!("create run dir {}", self.paths.root().display()))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }

    /// Write through a temp file in the run dir so a crash never leaves half a file.
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        self.ensure_root()?;
        let text = serde_json::to_string_pretty(value)
            .with_context(|| format!("serialize {}", path.display()))?;
        let mut staged = tempfile::NamedTempFile::new_in(self.paths.root())
            .context("stage run artifact")?;
        staged
            .write_all(text.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        staged
            .persist(path)
            .map_err(|err| err.error)
            .with_context(|| format!("persist {}", path.display()))?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Without a portable liveness check every recorded holder counts as running.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
