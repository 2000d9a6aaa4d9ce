//! Extraction stage tracker.
//!
//! Owns per-stage status and progress for the document processing phase that
//! follows an upload. Stages run strictly in order, at most one is Processing,
//! and an error halts the run for good.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    Loading,
    ExtractSections,
    ExtractQuestions,
    ExtractRequirements,
    ExtractMetadata,
    LinkItems,
}

impl ExtractionStage {
    pub const ALL: [ExtractionStage; 6] = [
        Self::Loading,
        Self::ExtractSections,
        Self::ExtractQuestions,
        Self::ExtractRequirements,
        Self::ExtractMetadata,
        Self::LinkItems,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Loading => "Document Loading",
            Self::ExtractSections => "Section Extraction",
            Self::ExtractQuestions => "Question Extraction",
            Self::ExtractRequirements => "Requirement Extraction",
            Self::ExtractMetadata => "Metadata Extraction",
            Self::LinkItems => "Relationship Mapping",
        }
    }
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status shared by extraction stages and macro-steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub stage: ExtractionStage,
    pub status: StageStatus,
    pub progress: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("extraction has not started")]
    NotStarted,
    #[error("extraction already finished ({0:?})")]
    Finished(RunStatus),
}

/// Serializable view of the tracker, persisted with the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSnapshot {
    pub status: RunStatus,
    pub overall_progress: f64,
    pub stages: Vec<StageState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionSnapshot {
    pub fn current_stage(&self) -> Option<&StageState> {
        self.stages
            .iter()
            .find(|state| matches!(state.status, StageStatus::Processing | StageStatus::Error))
    }
}

/// Highest progress a stage may report before it is completed.
const MAX_ACTIVE_PROGRESS: u8 = 99;

#[derive(Debug, Clone)]
pub struct ExtractionTracker {
    stages: Vec<StageState>,
    current: usize,
    status: RunStatus,
    error: Option<String>,
}

impl Default for ExtractionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionTracker {
    pub fn new() -> Self {
        let stages = ExtractionStage::ALL
            .iter()
            .map(|stage| StageState {
                stage: *stage,
                status: StageStatus::Pending,
                progress: 0,
            })
            .collect();
        Self {
            stages,
            current: 0,
            status: RunStatus::NotStarted,
            error: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    #[cfg(test)]
    pub fn stages(&self) -> &[StageState] {
        &self.stages
    }

    /// Stage currently Processing, if the run is active.
    pub fn current_stage(&self) -> Option<ExtractionStage> {
        (self.status == RunStatus::Running).then(|| self.stages[self.current].stage)
    }

    #[cfg(test)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn start(&mut self) -> Result<(), TrackerError> {
        match self.status {
            RunStatus::NotStarted => {
                self.current = 0;
                self.stages[0].status = StageStatus::Processing;
                self.status = RunStatus::Running;
                Ok(())
            }
            RunStatus::Running => Ok(()),
            finished => Err(TrackerError::Finished(finished)),
        }
    }

    /// Record progress for the active stage. Progress never moves backwards.
    pub fn report(&mut self, percent: u8) -> Result<(), TrackerError> {
        self.require_running()?;
        let state = &mut self.stages[self.current];
        state.progress = state.progress.max(percent.min(MAX_ACTIVE_PROGRESS));
        Ok(())
    }

    /// Complete the active stage and hand over to the next one.
    pub fn complete_current(&mut self) -> Result<(), TrackerError> {
        self.require_running()?;
        let state = &mut self.stages[self.current];
        state.status = StageStatus::Completed;
        state.progress = 100;
        if self.current + 1 < self.stages.len() {
            self.current += 1;
            self.stages[self.current].status = StageStatus::Processing;
        } else {
            self.status = RunStatus::Completed;
        }
        Ok(())
    }

    /// Move the active stage to Error; nothing advances afterwards.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TrackerError> {
        self.require_running()?;
        self.stages[self.current].status = StageStatus::Error;
        self.status = RunStatus::Failed;
        self.error = Some(message.into());
        Ok(())
    }

    /// Percentage across all stages: (completed stages + active fraction) / total.
    pub fn overall_progress(&self) -> f64 {
        if self.status == RunStatus::Completed {
            return 100.0;
        }
        let done: u32 = self
            .stages
            .iter()
            .map(|state| match state.status {
                StageStatus::Completed => 100,
                StageStatus::Processing | StageStatus::Error => u32::from(state.progress),
                StageStatus::Pending => 0,
            })
            .sum();
        f64::from(done) / self.stages.len() as f64
    }

    pub fn snapshot(&self) -> ExtractionSnapshot {
        ExtractionSnapshot {
            status: self.status,
            overall_progress: self.overall_progress(),
            stages: self.stages.clone(),
            error: self.error.clone(),
        }
    }

    fn require_running(&self) -> Result<(), TrackerError> {
        match self.status {
            RunStatus::Running => Ok(()),
            RunStatus::NotStarted => Err(TrackerError::NotStarted),
            finished => Err(TrackerError::Finished(finished)),
        }
    }
}

#[cfg(test)]
#[path = "stages_tests.rs"]
mod tests;
