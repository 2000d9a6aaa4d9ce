//! Sequencing of the upload, generate, edit and finalize macro-steps.
//!
//! Each step is one remote call bracketed by persisted transitions: the step is
//! marked Processing before the call and Completed or Error after it, so a run
//! directory always tells the truth about where the workflow stopped.
use super::progress::{drive_extraction, ProgressSource};
use super::stages::{ExtractionSnapshot, ExtractionTracker, RunStatus, StageStatus};
use super::state::{MacroStep, RunState, StepFailure, StepRecord};
use super::store::{RunHistoryEntry, RunLock, RunStore};
use crate::api::RfpBackend;
use crate::error::{ApiError, WorkflowError};
use crate::model::{DocType, GeneratedResponse, ProposalArtifacts, ResponseEdits, RfpDocument};
use crate::upload::{UploadCandidate, UploadPolicy, ValidatedBatch};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Inputs for the Edit step.
#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    pub edits: ResponseEdits,
    pub prompt: Option<String>,
}

/// What the user should do next with a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextAction {
    Run { step: MacroStep },
    Retry { step: MacroStep, failure: StepFailure },
    Download,
}

impl NextAction {
    pub fn for_state(state: &RunState) -> Self {
        if let Some(record) = state.failed_step() {
            if let Some(failure) = record.failure.clone() {
                return Self::Retry {
                    step: record.step,
                    failure,
                };
            }
        }
        match state.next_step() {
            Some(step) => Self::Run { step },
            None => Self::Download,
        }
    }

    pub fn command(&self, run_dir: &Path) -> String {
        let run = run_dir.display();
        match self {
            Self::Run { step } => format!("rfpflow {} --run {run}", step.command()),
            Self::Retry { .. } => format!("rfpflow resume --run {run}"),
            Self::Download => format!("rfpflow download --run {run} --doc-type pdf"),
        }
    }
}

/// Machine-readable run status for `status --json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfp_id: Option<String>,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionSnapshot>,
    pub next_action: NextAction,
    pub next_command: String,
}

impl RunSummary {
    pub fn new(state: &RunState, run_dir: &Path) -> Self {
        let next_action = NextAction::for_state(state);
        Self {
            run_id: state.run_id.clone(),
            run_dir: run_dir.to_path_buf(),
            rfp_id: state.rfp_id.clone(),
            steps: state.steps.clone(),
            extraction: state.extraction.clone(),
            next_command: next_action.command(run_dir),
            next_action,
        }
    }
}

pub struct Orchestrator<B: RfpBackend> {
    backend: B,
    store: RunStore,
    state: RunState,
    _lock: RunLock,
}

impl<B: RfpBackend> Orchestrator<B> {
    /// Lock the run in `store` and load it, or start a fresh one in memory.
    ///
    /// The lock is held until the orchestrator is dropped. With it held, a step
    /// still marked Processing belongs to a process that exited, so it is
    /// turned into an error here.
    pub fn open(backend: B, store: RunStore) -> Result<Self> {
        let lock = store.lock()?;
        let state = match store.load_state_optional()? {
            Some(state) => state,
            None => RunState::fresh()?,
        };
        let mut orchestrator = Self {
            backend,
            store,
            state,
            _lock: lock,
        };
        let interrupted = orchestrator.state.recover_interrupted()?;
        if !interrupted.is_empty() {
            orchestrator.store.save_state(&orchestrator.state)?;
            for step in interrupted {
                tracing::warn!(step = %step, "step was interrupted; marked as failed");
                orchestrator.history(step, "interrupted", |_| {})?;
            }
        }
        Ok(orchestrator)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn next_action(&self) -> NextAction {
        NextAction::for_state(&self.state)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::new(&self.state, self.store.paths().root())
    }

    /// Upload a validated batch, then drive the extraction stages.
    ///
    /// Completing Upload is what enables Generate. Uploading over a run that
    /// already has a document requires `restart`, which discards that run.
    pub fn upload<F>(
        &mut self,
        batch: &ValidatedBatch,
        progress: &mut dyn ProgressSource,
        observer: F,
        restart: bool,
    ) -> Result<RfpDocument>
    where
        F: FnMut(&ExtractionSnapshot),
    {
        if restart && self.store.exists() {
            self.restart()?;
        } else if self.state.status_of(MacroStep::Upload) == StageStatus::Completed {
            return Err(WorkflowError::AlreadyCompleted {
                step: MacroStep::Upload,
            }
            .into());
        }

        let parts = batch.read_parts()?;
        self.state.upload_sources = batch.sources();
        self.state.rfp_id = None;
        self.state.extraction = None;
        self.begin(MacroStep::Upload)?;
        tracing::info!(
            files = batch.candidates().len(),
            bytes = batch.total_bytes(),
            "uploading RFP documents"
        );

        let start = Instant::now();
        let document = match self.backend.upload_rfp(&parts) {
            Ok(document) => document,
            Err(err) => return Err(self.record_failure(MacroStep::Upload, err)),
        };
        self.store.write_artifact(MacroStep::Upload, &document)?;
        self.state.rfp_id = Some(document.rfp_id.clone());
        self.store.save_state(&self.state)?;

        let mut tracker = ExtractionTracker::new();
        let snapshot = drive_extraction(&mut tracker, progress, observer)?;
        let failed = snapshot.status == RunStatus::Failed;
        let extraction_error = snapshot.error.clone();
        self.state.extraction = Some(snapshot);
        if failed {
            let message = extraction_error.unwrap_or_else(|| "extraction failed".to_string());
            return Err(self.record_failure(MacroStep::Upload, ApiError::new(0, message)));
        }

        self.complete(MacroStep::Upload, start)?;
        Ok(document)
    }

    /// Turn the stored document into a generated draft.
    pub fn generate(&mut self, rerun: bool) -> Result<GeneratedResponse> {
        self.prepare(MacroStep::Generate, rerun)?;
        let document: RfpDocument = self
            .store
            .read_artifact(MacroStep::Upload)
            .context("load uploaded RFP document")?;
        self.begin(MacroStep::Generate)?;

        let start = Instant::now();
        let mut response = match self.backend.generate_response(&document) {
            Ok(response) => response,
            Err(err) => return Err(self.record_failure(MacroStep::Generate, err)),
        };
        if response.rfp_id.is_empty() {
            response.rfp_id = document.rfp_id.clone();
        } else if response.rfp_id != document.rfp_id {
            let mismatch = WorkflowError::MismatchedRfp {
                expected: document.rfp_id.clone(),
                actual: response.rfp_id.clone(),
            };
            self.persist_failure(
                MacroStep::Generate,
                &ApiError::new(0, mismatch.to_string()),
            )?;
            return Err(mismatch.into());
        }
        tracing::info!(
            rfp_id = %response.rfp_id,
            questions = response.questions.len(),
            sections = response.sections.len(),
            "response generated"
        );
        self.store.write_artifact(MacroStep::Generate, &response)?;
        self.complete(MacroStep::Generate, start)?;
        Ok(response)
    }

    /// Apply reviewer edits and, with a prompt, a remote refinement.
    pub fn edit(&mut self, request: &EditRequest, rerun: bool) -> Result<GeneratedResponse> {
        self.prepare(MacroStep::Edit, rerun)?;
        let response: GeneratedResponse = self
            .store
            .read_artifact(MacroStep::Generate)
            .context("load generated response")?;
        self.begin(MacroStep::Edit)?;

        let start = Instant::now();
        let prompt = request
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty());
        let refined = match prompt {
            Some(prompt) => match self.backend.refine_response(&response.rfp_id, prompt) {
                Ok(refined) => Some(refined.result),
                Err(err) => return Err(self.record_failure(MacroStep::Edit, err)),
            },
            None => None,
        };
        let edited = response.reviewed(&request.edits, refined.as_deref());
        tracing::info!(
            rfp_id = %edited.rfp_id,
            edits = request.edits.len(),
            refined = refined.is_some(),
            "response reviewed"
        );
        self.store.write_artifact(MacroStep::Edit, &edited)?;
        self.complete(MacroStep::Edit, start)?;
        Ok(edited)
    }

    /// Send the reviewed draft for document generation.
    pub fn finalize(&mut self, rerun: bool) -> Result<ProposalArtifacts> {
        self.prepare(MacroStep::Finalize, rerun)?;
        let edited: GeneratedResponse = self
            .store
            .read_artifact(MacroStep::Edit)
            .context("load reviewed response")?;
        self.begin(MacroStep::Finalize)?;

        let start = Instant::now();
        let artifacts = match self.backend.finalize_proposal(&edited) {
            Ok(artifacts) => artifacts,
            Err(err) => return Err(self.record_failure(MacroStep::Finalize, err)),
        };
        self.store.write_artifact(MacroStep::Finalize, &artifacts)?;
        self.complete(MacroStep::Finalize, start)?;
        Ok(artifacts)
    }

    /// Fetch a finalized document. Defaults to `downloads/<rfp_id>_proposal.<ext>`.
    pub fn download(
        &mut self,
        doc_type: DocType,
        dest_dir: Option<&Path>,
        filename: Option<&str>,
    ) -> Result<PathBuf> {
        if self.state.status_of(MacroStep::Finalize) != StageStatus::Completed {
            return Err(WorkflowError::NotReady {
                step: MacroStep::Finalize,
                reason: "download needs a finalized proposal".to_string(),
            }
            .into());
        }
        let rfp_id = self
            .state
            .rfp_id
            .clone()
            .ok_or_else(|| anyhow!("run has no rfp_id"))?;
        let dest_dir = dest_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.store.paths().downloads_dir());
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| doc_type.default_filename(&rfp_id));

        let start = Instant::now();
        let result = self
            .backend
            .download_document(&rfp_id, doc_type, &dest_dir, &filename);
        let elapsed_ms = start.elapsed().as_millis();
        match result {
            Ok(path) => {
                let saved = path.display().to_string();
                self.history(MacroStep::Finalize, "downloaded", |entry| {
                    entry.message = Some(saved);
                    entry.elapsed_ms = Some(elapsed_ms);
                })?;
                Ok(path)
            }
            Err(err) => {
                let api = err.downcast_ref::<ApiError>();
                let http_status = api.map(|api| api.status);
                let message = match api {
                    Some(api) => api.message.clone(),
                    None => format!("{err:#}"),
                };
                self.history(MacroStep::Finalize, "download_failed", |entry| {
                    entry.http_status = http_status;
                    entry.message = Some(message);
                    entry.elapsed_ms = Some(elapsed_ms);
                })?;
                Err(err.context(format!("download {doc_type} proposal")))
            }
        }
    }

    /// Continue from the first step that is not Completed, reusing persisted
    /// inputs. A failed upload is retried from its recorded source files.
    pub fn resume<F>(
        &mut self,
        request: &EditRequest,
        progress: &mut dyn ProgressSource,
        observer: F,
    ) -> Result<Vec<MacroStep>>
    where
        F: FnMut(&ExtractionSnapshot),
    {
        let mut ran = Vec::new();
        if self.state.status_of(MacroStep::Upload) != StageStatus::Completed {
            if self.state.upload_sources.is_empty() {
                return Err(WorkflowError::NotReady {
                    step: MacroStep::Upload,
                    reason: "no files recorded for this run".to_string(),
                }
                .into());
            }
            let sources = self.state.upload_sources.clone();
            let batch = match UploadCandidate::from_paths(&sources)
                .and_then(|candidates| {
                    UploadPolicy::rfp()
                        .validate(candidates)
                        .map_err(anyhow::Error::from)
                })
            {
                Ok(batch) => batch,
                Err(err) => {
                    self.discard_staged_batch()?;
                    return Err(err);
                }
            };
            self.upload(&batch, progress, observer, false)?;
            ran.push(MacroStep::Upload);
        }
        ran.extend(self.advance(request)?);
        Ok(ran)
    }

    /// Upload then run every remaining step.
    pub fn run_all<F>(
        &mut self,
        batch: &ValidatedBatch,
        request: &EditRequest,
        progress: &mut dyn ProgressSource,
        observer: F,
        restart: bool,
    ) -> Result<Vec<MacroStep>>
    where
        F: FnMut(&ExtractionSnapshot),
    {
        self.upload(batch, progress, observer, restart)?;
        let mut ran = vec![MacroStep::Upload];
        ran.extend(self.advance(request)?);
        Ok(ran)
    }

    /// Forget the files recorded for an upload that has not completed.
    ///
    /// Called when a batch is rejected so a later `resume` cannot send files the
    /// user has since replaced. Returns whether anything was dropped.
    pub fn discard_staged_batch(&mut self) -> Result<bool> {
        if self.state.status_of(MacroStep::Upload) == StageStatus::Completed
            || self.state.upload_sources.is_empty()
        {
            return Ok(false);
        }
        let dropped = self.state.upload_sources.len();
        self.state.upload_sources.clear();
        self.store.save_state(&self.state)?;
        tracing::info!(files = dropped, "dropped files staged for upload");
        self.history(MacroStep::Upload, "batch_rejected", |entry| {
            entry.message = Some(format!("dropped {dropped} staged file(s)"));
        })?;
        Ok(true)
    }

    fn advance(&mut self, request: &EditRequest) -> Result<Vec<MacroStep>> {
        let mut ran = Vec::new();
        while let Some(step) = self.state.next_step() {
            match step {
                MacroStep::Upload => break,
                MacroStep::Generate => {
                    self.generate(false)?;
                }
                MacroStep::Edit => {
                    self.edit(request, false)?;
                }
                MacroStep::Finalize => {
                    self.finalize(false)?;
                }
            }
            ran.push(step);
        }
        Ok(ran)
    }

    /// Check ordering and the rerun rule before a step starts.
    fn prepare(&mut self, step: MacroStep, rerun: bool) -> Result<()> {
        for earlier in MacroStep::ALL.iter().take(step.index()) {
            let status = self.state.status_of(*earlier);
            if status != StageStatus::Completed {
                return Err(WorkflowError::NotReady {
                    step,
                    reason: format!("{earlier} is {status}"),
                }
                .into());
            }
        }
        if self.state.status_of(step) == StageStatus::Completed {
            if !rerun {
                return Err(WorkflowError::AlreadyCompleted { step }.into());
            }
            self.reset_from(step)?;
            self.history(step, "rerun", |_| {})?;
        }
        Ok(())
    }

    /// Put `step` and everything after it back to Pending and drop their artifacts.
    fn reset_from(&mut self, step: MacroStep) -> Result<()> {
        for later in MacroStep::ALL.iter().skip(step.index()) {
            self.state.set_status(*later, StageStatus::Pending, None)?;
            self.store.remove_artifact(*later)?;
        }
        self.store.save_state(&self.state)
    }

    fn restart(&mut self) -> Result<()> {
        let previous = self.state.run_id.clone();
        self.store.clear()?;
        self.state = RunState::fresh()?;
        tracing::info!(previous_run = %previous, run_id = %self.state.run_id, "run restarted");
        self.history(MacroStep::Upload, "restarted", |entry| {
            entry.message = Some(format!("replaces {previous}"));
        })
    }

    fn begin(&mut self, step: MacroStep) -> Result<()> {
        self.state
            .set_status(step, StageStatus::Processing, None)?;
        self.store.save_state(&self.state)?;
        tracing::debug!(step = %step, "step started");
        self.history(step, "started", |_| {})
    }

    fn complete(&mut self, step: MacroStep, start: Instant) -> Result<()> {
        let elapsed_ms = start.elapsed().as_millis();
        self.state.set_status(step, StageStatus::Completed, None)?;
        self.store.save_state(&self.state)?;
        tracing::info!(
            step = %step,
            rfp_id = self.state.rfp_id.as_deref().unwrap_or(""),
            elapsed_ms,
            "step completed"
        );
        self.history(step, "completed", |entry| entry.elapsed_ms = Some(elapsed_ms))
    }

    fn persist_failure(&mut self, step: MacroStep, err: &ApiError) -> Result<()> {
        self.state
            .set_status(step, StageStatus::Error, Some(StepFailure::from(err)))?;
        self.store.save_state(&self.state)?;
        tracing::warn!(step = %step, status = err.status, error = %err.message, "step failed");
        self.history(step, "failed", |entry| {
            entry.http_status = Some(err.status);
            entry.message = Some(err.message.clone());
        })
    }

    fn record_failure(&mut self, step: MacroStep, source: ApiError) -> anyhow::Error {
        if let Err(persist) = self.persist_failure(step, &source) {
            return persist.context(format!("record {step} failure: {source}"));
        }
        WorkflowError::StepFailed { step, source }.into()
    }

    fn history<F>(&self, step: MacroStep, event: &str, fill: F) -> Result<()>
    where
        F: FnOnce(&mut RunHistoryEntry),
    {
        let mut entry = RunHistoryEntry::new(&self.state, step, event)?;
        fill(&mut entry);
        self.store.append_history(&entry)
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
