use super::*;
use crate::workflow::progress::SimulatedProgress;
use crate::workflow::state::INTERRUPTED_MESSAGE;
use serde_json::json;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::rc::Rc;
use tempfile::TempDir;

#[derive(Default)]
struct Script {
    upload_failures: VecDeque<ApiError>,
    generate_failures: VecDeque<ApiError>,
    generate_rfp_id: Option<String>,
    calls: BTreeMap<&'static str, usize>,
    generated_from: Vec<String>,
    refine_prompts: Vec<String>,
    finalized: Vec<GeneratedResponse>,
}

/// Scripted backend; clones share one script so tests can inspect calls.
#[derive(Clone, Default)]
struct FakeBackend {
    script: Rc<RefCell<Script>>,
}

impl FakeBackend {
    fn calls(&self, name: &str) -> usize {
        self.script.borrow().calls.get(name).copied().unwrap_or(0)
    }

    fn fail_next_upload(&self, err: ApiError) {
        self.script.borrow_mut().upload_failures.push_back(err);
    }

    fn fail_next_generate(&self, err: ApiError) {
        self.script.borrow_mut().generate_failures.push_back(err);
    }

    fn bump(&self, name: &'static str) {
        *self.script.borrow_mut().calls.entry(name).or_default() += 1;
    }
}

impl RfpBackend for FakeBackend {
    fn upload_rfp(&self, parts: &[crate::upload::FilePart]) -> Result<RfpDocument, ApiError> {
        self.bump("upload");
        assert!(!parts.is_empty());
        if let Some(err) = self.script.borrow_mut().upload_failures.pop_front() {
            return Err(err);
        }
        Ok(serde_json::from_value(json!({
            "rfp_id": "RFP-42",
            "structured_data": {
                "metadata": {"title": "Regional transit ticketing"},
                "sections": [{"id": 1, "title": "Scope"}],
                "questions": [
                    {"id": 1, "question": "Describe your uptime SLA"},
                    {"id": 2, "question": "List comparable deployments"}
                ],
                "requirements": [{"id": "R1", "requirement": "PCI DSS"}]
            }
        }))
        .expect("fixture document"))
    }

    fn generate_response(&self, document: &RfpDocument) -> Result<GeneratedResponse, ApiError> {
        self.bump("generate");
        let mut script = self.script.borrow_mut();
        script.generated_from.push(document.rfp_id.clone());
        if let Some(err) = script.generate_failures.pop_front() {
            return Err(err);
        }
        let rfp_id = script.generate_rfp_id.clone().unwrap_or_default();
        let questions: Vec<serde_json::Value> = document
            .structured_data
            .questions
            .iter()
            .map(|q| json!({"id": q["id"], "question": q["question"], "ai_answer": "draft"}))
            .collect();
        Ok(serde_json::from_value(json!({
            "rfp_id": rfp_id,
            "metadata": {"title": "Regional transit ticketing"},
            "sections": [{"id": 1, "ai_response": "draft scope"}],
            "questions": questions,
            "requirements": [{"id": "R1", "ai_explanation": "compliant"}]
        }))
        .expect("fixture response"))
    }

    fn refine_response(
        &self,
        _rfp_id: &str,
        prompt: &str,
    ) -> Result<crate::model::RefinedText, ApiError> {
        self.bump("refine");
        self.script
            .borrow_mut()
            .refine_prompts
            .push(prompt.to_string());
        Ok(crate::model::RefinedText {
            result: format!("refined: {prompt}"),
        })
    }

    fn finalize_proposal(
        &self,
        response: &GeneratedResponse,
    ) -> Result<ProposalArtifacts, ApiError> {
        self.bump("finalize");
        self.script.borrow_mut().finalized.push(response.clone());
        Ok(ProposalArtifacts {
            docx: "RFP-42.docx".to_string(),
            pdf: "RFP-42.pdf".to_string(),
        })
    }

    fn download_document(
        &self,
        rfp_id: &str,
        doc_type: DocType,
        dest_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf> {
        self.bump("download");
        fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(filename);
        fs::write(&path, format!("{rfp_id}:{doc_type}"))?;
        Ok(path)
    }
}

struct Harness {
    dir: TempDir,
    backend: FakeBackend,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            backend: FakeBackend::default(),
        }
    }

    fn run_dir(&self) -> PathBuf {
        self.dir.path().join("run")
    }

    fn open(&self) -> Orchestrator<FakeBackend> {
        Orchestrator::open(self.backend.clone(), RunStore::new(self.run_dir())).expect("open")
    }

    fn file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, bytes).expect("write upload");
        path
    }

    fn pdf_batch(&self) -> ValidatedBatch {
        let path = self.file("tender.pdf", b"%PDF-1.7 tender");
        let candidates = UploadCandidate::from_paths(&[path]).expect("candidates");
        UploadPolicy::rfp().validate(candidates).expect("valid batch")
    }
}

fn upload(orchestrator: &mut Orchestrator<FakeBackend>, batch: &ValidatedBatch) -> RfpDocument {
    orchestrator
        .upload(batch, &mut SimulatedProgress::immediate(), |_| {}, false)
        .expect("upload")
}

fn workflow_error(err: &anyhow::Error) -> &WorkflowError {
    err.downcast_ref::<WorkflowError>()
        .unwrap_or_else(|| panic!("expected WorkflowError, got {err:#}"))
}

#[test]
fn pdf_upload_completes_extraction_and_enables_generate() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    let batch = harness.pdf_batch();
    let mut overall = Vec::new();
    let document = orchestrator
        .upload(
            &batch,
            &mut SimulatedProgress::immediate(),
            |snap| overall.push(snap.overall_progress),
            false,
        )
        .expect("upload");

    assert_eq!(document.rfp_id, "RFP-42");
    assert_eq!(
        orchestrator.state().status_of(MacroStep::Upload),
        StageStatus::Completed
    );
    assert_eq!(
        orchestrator.next_action(),
        NextAction::Run {
            step: MacroStep::Generate
        }
    );
    assert!(overall.windows(2).all(|pair| pair[1] >= pair[0]));
    assert_eq!(overall.last().copied(), Some(100.0));
    let extraction = orchestrator.state().extraction.clone().expect("snapshot");
    assert_eq!(extraction.status, RunStatus::Completed);

    drop(orchestrator);
    let reopened = harness.open();
    assert_eq!(reopened.state().rfp_id.as_deref(), Some("RFP-42"));
    assert_eq!(reopened.state().upload_sources, batch.sources());
    assert!(reopened.store().paths().document_path().is_file());
}

#[test]
fn generate_failure_keeps_the_server_message_and_blocks_finalize() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    upload(&mut orchestrator, &harness.pdf_batch());
    harness
        .backend
        .fail_next_generate(ApiError::new(500, "model unavailable"));

    let err = orchestrator.generate(false).unwrap_err();
    match workflow_error(&err) {
        WorkflowError::StepFailed { step, source } => {
            assert_eq!(*step, MacroStep::Generate);
            assert_eq!(source.message, "model unavailable");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let record = orchestrator.state().record(MacroStep::Generate);
    assert_eq!(record.status, StageStatus::Error);
    assert_eq!(
        record.failure,
        Some(StepFailure {
            status: 500,
            message: "model unavailable".to_string()
        })
    );

    let err = orchestrator.finalize(false).unwrap_err();
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::NotReady {
            step: MacroStep::Finalize,
            ..
        }
    ));
    assert_eq!(harness.backend.calls("finalize"), 0);
    assert!(matches!(
        orchestrator.next_action(),
        NextAction::Retry {
            step: MacroStep::Generate,
            ..
        }
    ));

    let events: Vec<String> = orchestrator
        .store()
        .read_history()
        .expect("history")
        .into_iter()
        .filter(|entry| entry.step == MacroStep::Generate)
        .map(|entry| entry.event)
        .collect();
    assert_eq!(events, vec!["started", "failed"]);
}

#[test]
fn resume_continues_from_the_failed_step_with_stored_document() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    upload(&mut orchestrator, &harness.pdf_batch());
    harness
        .backend
        .fail_next_generate(ApiError::new(503, "busy"));
    assert!(orchestrator.generate(false).is_err());
    drop(orchestrator);

    let mut resumed = harness.open();
    let ran = resumed
        .resume(
            &EditRequest::default(),
            &mut SimulatedProgress::immediate(),
            |_| {},
        )
        .expect("resume");

    assert_eq!(
        ran,
        vec![MacroStep::Generate, MacroStep::Edit, MacroStep::Finalize]
    );
    assert_eq!(harness.backend.calls("upload"), 1);
    assert_eq!(
        harness.backend.script.borrow().generated_from,
        vec!["RFP-42".to_string(), "RFP-42".to_string()]
    );
    assert!(resumed.state().is_complete());
    assert_eq!(resumed.next_action(), NextAction::Download);
}

#[test]
fn resume_retries_a_failed_upload_from_recorded_sources() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    harness
        .backend
        .fail_next_upload(ApiError::network("connection refused"));
    let err = orchestrator
        .upload(
            &harness.pdf_batch(),
            &mut SimulatedProgress::immediate(),
            |_| {},
            false,
        )
        .unwrap_err();
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::StepFailed {
            step: MacroStep::Upload,
            ..
        }
    ));
    assert_eq!(
        orchestrator.state().status_of(MacroStep::Upload),
        StageStatus::Error
    );

    let ran = orchestrator
        .resume(
            &EditRequest::default(),
            &mut SimulatedProgress::immediate(),
            |_| {},
        )
        .expect("resume");
    assert_eq!(ran.first(), Some(&MacroStep::Upload));
    assert_eq!(harness.backend.calls("upload"), 2);
    assert!(orchestrator.state().is_complete());
}

#[test]
fn resume_revalidates_sources_before_any_call() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    harness
        .backend
        .fail_next_upload(ApiError::new(502, "Bad Gateway"));
    let batch = harness.pdf_batch();
    assert!(orchestrator
        .upload(&batch, &mut SimulatedProgress::immediate(), |_| {}, false)
        .is_err());
    for source in batch.sources() {
        fs::remove_file(source).expect("remove source");
    }

    assert!(orchestrator
        .resume(
            &EditRequest::default(),
            &mut SimulatedProgress::immediate(),
            |_| {}
        )
        .is_err());
    assert_eq!(harness.backend.calls("upload"), 1);
}

#[test]
fn completed_step_needs_rerun_and_rerun_resets_downstream() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    orchestrator
        .run_all(
            &harness.pdf_batch(),
            &EditRequest::default(),
            &mut SimulatedProgress::immediate(),
            |_| {},
            false,
        )
        .expect("run all");
    assert!(orchestrator.state().is_complete());

    let err = orchestrator.generate(false).unwrap_err();
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::AlreadyCompleted {
            step: MacroStep::Generate
        }
    ));
    assert_eq!(harness.backend.calls("generate"), 1);

    orchestrator.generate(true).expect("rerun generate");
    assert_eq!(harness.backend.calls("generate"), 2);
    assert_eq!(
        orchestrator.state().status_of(MacroStep::Generate),
        StageStatus::Completed
    );
    for step in [MacroStep::Edit, MacroStep::Finalize] {
        assert_eq!(orchestrator.state().status_of(step), StageStatus::Pending);
        assert!(!orchestrator.store().paths().artifact_path(step).exists());
    }
    assert_eq!(
        orchestrator.next_action(),
        NextAction::Run {
            step: MacroStep::Edit
        }
    );
}

#[test]
fn edit_applies_changes_and_refined_text() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    upload(&mut orchestrator, &harness.pdf_batch());
    orchestrator.generate(false).expect("generate");

    let mut edits = ResponseEdits::default();
    edits
        .questions
        .insert("2".to_string(), "Three national rollouts".to_string());
    let request = EditRequest {
        edits,
        prompt: Some("tighten the tone".to_string()),
    };
    let edited = orchestrator.edit(&request, false).expect("edit");

    assert_eq!(edited.rfp_id, "RFP-42");
    assert_eq!(edited.questions[0]["ai_answer"], "draft");
    assert_eq!(edited.questions[1]["ai_answer"], "Three national rollouts");
    assert_eq!(edited.metadata["status"], "reviewed");
    assert_eq!(edited.metadata["refined_text"], "refined: tighten the tone");
    assert!(edited.metadata["edited_at"].is_string());
    assert_eq!(
        harness.backend.script.borrow().refine_prompts,
        vec!["tighten the tone".to_string()]
    );

    orchestrator.finalize(false).expect("finalize");
    let finalized = harness.backend.script.borrow().finalized.clone();
    assert_eq!(finalized, vec![edited]);
}

#[test]
fn edit_without_prompt_makes_no_remote_call() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    upload(&mut orchestrator, &harness.pdf_batch());
    orchestrator.generate(false).expect("generate");
    let request = EditRequest {
        edits: ResponseEdits::default(),
        prompt: Some("   ".to_string()),
    };
    let edited = orchestrator.edit(&request, false).expect("edit");
    assert_eq!(harness.backend.calls("refine"), 0);
    assert!(edited.metadata.get("refined_text").is_none());
}

#[test]
fn generated_response_for_another_rfp_is_rejected() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    upload(&mut orchestrator, &harness.pdf_batch());
    harness.backend.script.borrow_mut().generate_rfp_id = Some("RFP-7".to_string());

    let err = orchestrator.generate(false).unwrap_err();
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::MismatchedRfp { .. }
    ));
    assert_eq!(
        orchestrator.state().status_of(MacroStep::Generate),
        StageStatus::Error
    );
    assert!(!orchestrator.store().paths().response_path().exists());
}

#[test]
fn steps_left_processing_are_marked_interrupted_on_open() {
    let harness = Harness::new();
    {
        let mut orchestrator = harness.open();
        upload(&mut orchestrator, &harness.pdf_batch());
    }
    let store = RunStore::new(harness.run_dir());
    let mut state = store.load_state().expect("state");
    state
        .set_status(MacroStep::Generate, StageStatus::Processing, None)
        .expect("set");
    store.save_state(&state).expect("save");

    let orchestrator = harness.open();
    let record = orchestrator.state().record(MacroStep::Generate);
    assert_eq!(record.status, StageStatus::Error);
    assert_eq!(
        record.failure.as_ref().map(|f| f.message.as_str()),
        Some(INTERRUPTED_MESSAGE)
    );
    let persisted = store.load_state().expect("state");
    assert_eq!(persisted.status_of(MacroStep::Generate), StageStatus::Error);
}

#[test]
fn reupload_requires_restart() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    let batch = harness.pdf_batch();
    upload(&mut orchestrator, &batch);
    orchestrator.generate(false).expect("generate");

    let err = orchestrator
        .upload(&batch, &mut SimulatedProgress::immediate(), |_| {}, false)
        .unwrap_err();
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::AlreadyCompleted {
            step: MacroStep::Upload
        }
    ));
    assert_eq!(harness.backend.calls("upload"), 1);

    orchestrator
        .upload(&batch, &mut SimulatedProgress::immediate(), |_| {}, true)
        .expect("restart upload");
    assert_eq!(harness.backend.calls("upload"), 2);
    assert_eq!(
        orchestrator.state().status_of(MacroStep::Generate),
        StageStatus::Pending
    );
    assert!(!orchestrator.store().paths().response_path().exists());
    let history = orchestrator.store().read_history().expect("history");
    assert!(history.iter().any(|entry| entry.event == "restarted"));
}

#[test]
fn download_requires_a_finalized_proposal() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    upload(&mut orchestrator, &harness.pdf_batch());
    let err = orchestrator.download(DocType::Pdf, None, None).unwrap_err();
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::NotReady { .. }
    ));
    assert_eq!(harness.backend.calls("download"), 0);

    orchestrator.generate(false).expect("generate");
    orchestrator
        .edit(&EditRequest::default(), false)
        .expect("edit");
    orchestrator.finalize(false).expect("finalize");
    let saved = orchestrator
        .download(DocType::Docx, None, None)
        .expect("download");
    assert_eq!(
        saved,
        harness
            .run_dir()
            .join("downloads")
            .join("RFP-42_proposal.docx")
    );
    assert_eq!(fs::read_to_string(&saved).expect("read"), "RFP-42:docx");
}

#[test]
fn busy_run_is_refused_and_its_running_step_left_alone() {
    let harness = Harness::new();
    let mut first = harness.open();
    upload(&mut first, &harness.pdf_batch());
    first.begin(MacroStep::Generate).expect("begin generate");

    let Err(err) = Orchestrator::open(harness.backend.clone(), RunStore::new(harness.run_dir()))
    else {
        panic!("second open should be refused while the run is locked");
    };
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::RunInUse { .. }
    ));
    assert_eq!(harness.backend.calls("generate"), 0);
    let on_disk = RunStore::new(harness.run_dir()).load_state().expect("state");
    assert_eq!(on_disk.status_of(MacroStep::Generate), StageStatus::Processing);

    drop(first);
    let reopened = harness.open();
    let record = reopened.state().record(MacroStep::Generate);
    assert_eq!(record.status, StageStatus::Error);
    assert_eq!(
        record.failure.as_ref().map(|f| f.message.as_str()),
        Some(INTERRUPTED_MESSAGE)
    );
}

#[test]
fn rejected_batch_drops_files_staged_by_a_failed_upload() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    harness
        .backend
        .fail_next_upload(ApiError::new(502, "Bad Gateway"));
    assert!(orchestrator
        .upload(
            &harness.pdf_batch(),
            &mut SimulatedProgress::immediate(),
            |_| {},
            false
        )
        .is_err());
    assert!(!orchestrator.state().upload_sources.is_empty());

    assert!(orchestrator.discard_staged_batch().expect("discard"));
    drop(orchestrator);

    let mut reopened = harness.open();
    assert!(reopened.state().upload_sources.is_empty());
    let err = reopened
        .resume(
            &EditRequest::default(),
            &mut SimulatedProgress::immediate(),
            |_| {},
        )
        .unwrap_err();
    assert!(matches!(
        workflow_error(&err),
        WorkflowError::NotReady {
            step: MacroStep::Upload,
            ..
        }
    ));
    assert_eq!(harness.backend.calls("upload"), 1);
}

#[test]
fn completed_upload_keeps_its_sources_when_a_later_batch_is_rejected() {
    let harness = Harness::new();
    let mut orchestrator = harness.open();
    let batch = harness.pdf_batch();
    upload(&mut orchestrator, &batch);
    assert!(!orchestrator.discard_staged_batch().expect("discard"));
    assert_eq!(orchestrator.state().upload_sources, batch.sources());
}
