//! Persisted state of one workflow run.
use super::stages::{ExtractionSnapshot, StageStatus};
use crate::error::ApiError;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub const RUN_SCHEMA_VERSION: u32 = 1;

/// Top-level workflow phases, each backed by one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroStep {
    Upload,
    Generate,
    Edit,
    Finalize,
}

impl MacroStep {
    pub const ALL: [MacroStep; 4] = [Self::Upload, Self::Generate, Self::Edit, Self::Finalize];

    pub fn index(self) -> usize {
        match self {
            Self::Upload => 0,
            Self::Generate => 1,
            Self::Edit => 2,
            Self::Finalize => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Upload => "Upload",
            Self::Generate => "Generate Response",
            Self::Edit => "Edit Response",
            Self::Finalize => "Finalize Proposal",
        }
    }

    /// CLI subcommand that runs this step.
    pub fn command(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Generate => "generate",
            Self::Edit => "edit",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for MacroStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Verbatim API failure recorded against a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub status: u16,
    pub message: String,
}

impl From<&ApiError> for StepFailure {
    fn from(err: &ApiError) -> Self {
        Self {
            status: err.status,
            message: err.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: MacroStep,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    pub updated_at_epoch_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub run_id: String,
    pub started_at_epoch_ms: u128,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upload_sources: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionSnapshot>,
}

/// Message recorded when a step was left Processing by an abandoned process.
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

impl RunState {
    pub fn fresh() -> Result<Self> {
        let now = now_epoch_ms()?;
        let steps = MacroStep::ALL
            .iter()
            .map(|step| StepRecord {
                step: *step,
                status: StageStatus::Pending,
                failure: None,
                updated_at_epoch_ms: now,
            })
            .collect();
        Ok(Self {
            schema_version: RUN_SCHEMA_VERSION,
            run_id: format!("run-{now}"),
            started_at_epoch_ms: now,
            steps,
            upload_sources: Vec::new(),
            rfp_id: None,
            extraction: None,
        })
    }

    pub fn record(&self, step: MacroStep) -> &StepRecord {
        &self.steps[step.index()]
    }

    pub fn status_of(&self, step: MacroStep) -> StageStatus {
        self.record(step).status
    }

    pub fn set_status(
        &mut self,
        step: MacroStep,
        status: StageStatus,
        failure: Option<StepFailure>,
    ) -> Result<()> {
        let now = now_epoch_ms()?;
        let record = &mut self.steps[step.index()];
        record.status = status;
        record.failure = failure;
        record.updated_at_epoch_ms = now;
        Ok(())
    }

    /// First step that is not Completed; `None` once the proposal is final.
    pub fn next_step(&self) -> Option<MacroStep> {
        self.steps
            .iter()
            .find(|record| record.status != StageStatus::Completed)
            .map(|record| record.step)
    }

    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps
            .iter()
            .find(|record| record.status == StageStatus::Error)
    }

    pub fn is_complete(&self) -> bool {
        self.next_step().is_none()
    }

    /// Turn steps left Processing into errors so they can be retried.
    ///
    /// Returns the steps that were converted.
    pub fn recover_interrupted(&mut self) -> Result<Vec<MacroStep>> {
        let interrupted: Vec<MacroStep> = self
            .steps
            .iter()
            .filter(|record| record.status == StageStatus::Processing)
            .map(|record| record.step)
            .collect();
        for step in &interrupted {
            self.set_status(
                *step,
                StageStatus::Error,
                Some(StepFailure {
                    status: 0,
                    message: INTERRUPTED_MESSAGE.to_string(),
                }),
            )?;
        }
        Ok(interrupted)
    }

    /// Structural checks on a state read from disk.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != RUN_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported run schema_version {}",
                self.schema_version
            ));
        }
        let order: Vec<MacroStep> = self.steps.iter().map(|record| record.step).collect();
        if order != MacroStep::ALL {
            return Err(anyhow!("run steps are missing or out of order"));
        }
        let mut blocked = false;
        for record in &self.steps {
            if blocked && record.status != StageStatus::Pending {
                return Err(anyhow!(
                    "{} is {} but an earlier step is not completed",
                    record.step,
                    record.status
                ));
            }
            if record.status != StageStatus::Completed {
                blocked = true;
            }
        }
        Ok(())
    }
}

pub fn now_epoch_ms() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock before UNIX epoch"))?
        .as_millis())
}
