//! Session identity and the role gate in front of workflow entry points.
//!
//! The identity is read from an explicit session file and handed to the
//! components that need it; nothing here writes session state.
use crate::config::{app_config_dir, ClientConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SESSION_ENV: &str = "RFPFLOW_SESSION";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    #[serde(alias = "worker")]
    Employee,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Employee => "employee",
            Self::User => "user",
        }
    }

    fn is_staff(self) -> bool {
        matches!(self, Self::SuperAdmin | Self::Admin | Self::Employee)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Workflow entry points guarded by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    UploadRfp,
    Generate,
    Edit,
    Finalize,
    Download,
    CompanyDocs,
    PasswordReset,
}

impl EntryPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UploadRfp => "upload",
            Self::Generate => "generate",
            Self::Edit => "edit",
            Self::Finalize => "finalize",
            Self::Download => "download",
            Self::CompanyDocs => "company-docs",
            Self::PasswordReset => "reset-password",
        }
    }

    pub fn requires_session(self) -> bool {
        !matches!(self, Self::PasswordReset)
    }

    pub fn allows(self, role: Role) -> bool {
        match self {
            Self::UploadRfp | Self::PasswordReset => true,
            Self::Generate | Self::Edit | Self::Finalize | Self::Download | Self::CompanyDocs => {
                role.is_staff()
            }
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{entry} requires a session (pass --session or set RFPFLOW_SESSION)")]
    Missing { entry: EntryPoint },
    #[error("role {role} may not use {entry}")]
    Forbidden { role: Role, entry: EntryPoint },
}

/// Admit `identity` to `entry`, or explain why not.
pub fn authorize(
    identity: Option<&SessionIdentity>,
    entry: EntryPoint,
) -> Result<(), SessionError> {
    if !entry.requires_session() {
        return Ok(());
    }
    let identity = identity.ok_or(SessionError::Missing { entry })?;
    if entry.allows(identity.role) {
        Ok(())
    } else {
        Err(SessionError::Forbidden {
            role: identity.role,
            entry,
        })
    }
}

/// Session file by priority: flag, `RFPFLOW_SESSION`, config, default location.
pub fn resolve_session_path(flag: Option<&Path>, config: &ClientConfig) -> Option<PathBuf> {
    let env_value = env::var_os(SESSION_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    pick_session_path(
        flag,
        env_value,
        config,
        app_config_dir().map(|dir| dir.join(SESSION_FILE)),
    )
}

fn pick_session_path(
    flag: Option<&Path>,
    env_value: Option<PathBuf>,
    config: &ClientConfig,
    default_path: Option<PathBuf>,
) -> Option<PathBuf> {
    flag.map(Path::to_path_buf)
        .or(env_value)
        .or_else(|| config.session_path.clone())
        .or(default_path)
}

pub fn load_session(path: &Path) -> Result<SessionIdentity> {
    let bytes = fs::read(path).with_context(|| format!("read session {}", path.display()))?;
    let identity: SessionIdentity =
        serde_json::from_slice(&bytes).context("parse session JSON")?;
    Ok(identity)
}

/// Load the session at `path` if the file exists.
pub fn load_session_optional(path: Option<&Path>) -> Result<Option<SessionIdentity>> {
    match path {
        Some(path) if path.is_file() => load_session(path).map(Some),
        _ => Ok(None),
    }
}
