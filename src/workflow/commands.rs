//! Subcommand handlers.
//!
//! Handlers load the context, check the role gate, call into the orchestrator
//! or service and report results: artifacts and summaries on stdout, progress
//! and hints on stderr.
use super::context::AppContext;
use super::orchestrator::{EditRequest, NextAction, Orchestrator, RunSummary};
use super::progress::{ProgressSource, SimulatedProgress};
use super::stages::{ExtractionSnapshot, StageStatus};
use super::state::MacroStep;
use super::store::RunStore;
use crate::api::{validate_password_reset, RfpService};
use crate::cli::{
    CompanyDocsCommand, ConfigArgs, DownloadArgs, EditArgs, EditInputs, GlobalArgs,
    ResetPasswordArgs, ResumeArgs, RunArgs, StatusArgs, StepArgs, UploadArgs,
};
use crate::config;
use crate::error::WorkflowError;
use crate::model::{PasswordResetRequest, ResponseEdits};
use crate::session::EntryPoint;
use crate::upload::{UploadCandidate, UploadPolicy, ValidatedBatch};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) fn run_upload(global: &GlobalArgs, args: &UploadArgs) -> Result<()> {
    let ctx = AppContext::load(global)?;
    ctx.authorize(EntryPoint::UploadRfp)?;
    let batch = validated_rfp_batch(&ctx, &args.run, &args.files)?;
    let mut orchestrator = open(&ctx, &args.run)?;
    let mut progress = progress_source(&ctx, args.no_wait);
    let result = orchestrator.upload(
        &batch,
        progress.as_mut(),
        extraction_printer(),
        args.restart,
    );
    let document = with_hint(result, &orchestrator)?;
    let data = &document.structured_data;
    println!(
        "uploaded RFP {}: {} sections, {} questions, {} requirements",
        document.rfp_id,
        data.sections.len(),
        data.questions.len(),
        data.requirements.len()
    );
    print_next(&orchestrator);
    Ok(())
}

pub(crate) fn run_generate(global: &GlobalArgs, args: &StepArgs) -> Result<()> {
    let ctx = AppContext::load(global)?;
    ctx.authorize(EntryPoint::Generate)?;
    let mut orchestrator = open(&ctx, &args.run)?;
    let result = orchestrator.generate(args.rerun);
    let response = with_hint(result, &orchestrator)?;
    println!(
        "generated response for {}: {} answers",
        response.rfp_id,
        response.questions.len()
    );
    println!(
        "wrote {}",
        orchestrator.store().paths().response_path().display()
    );
    print_next(&orchestrator);
    Ok(())
}

pub(crate) fn run_edit(global: &GlobalArgs, args: &EditArgs) -> Result<()> {
    let ctx = AppContext::load(global)?;
    ctx.authorize(EntryPoint::Edit)?;
    let request = edit_request(&args.inputs)?;
    let mut orchestrator = open(&ctx, &args.run)?;
    let result = orchestrator.edit(&request, args.rerun);
    with_hint(result, &orchestrator)?;
    println!(
        "wrote {}",
        orchestrator.store().paths().edited_path().display()
    );
    print_next(&orchestrator);
    Ok(())
}

pub(crate) fn run_finalize(global: &GlobalArgs, args: &StepArgs) -> Result<()> {
    let ctx = AppContext::load(global)?;
    ctx.authorize(EntryPoint::Finalize)?;
    let mut orchestrator = open(&ctx, &args.run)?;
    let result = orchestrator.finalize(args.rerun);
    let artifacts = with_hint(result, &orchestrator)?;
    println!("proposal ready: docx={} pdf={}", artifacts.docx, artifacts.pdf);
    print_next(&orchestrator);
    Ok(())
}

pub(crate) fn run_download(global: &GlobalArgs, args: &DownloadArgs) -> Result<()> {
    let ctx = AppContext::load(global)?;
    ctx.authorize(EntryPoint::Download)?;
    let mut orchestrator = open(&ctx, &args.run)?;
    let saved = orchestrator.download(
        args.doc_type,
        args.out.as_deref(),
        args.filename.as_deref(),
    )?;
    println!("wrote {}", saved.display());
    Ok(())
}

/// Read-only: a step another process is running still shows as processing.
pub(crate) fn run_status(args: &StatusArgs) -> Result<()> {
    let store = RunStore::new(args.run.clone());
    let state = store.load_state_optional()?.ok_or_else(|| {
        anyhow!(
            "no run at {} (start one with `rfpflow upload`)",
            args.run.display()
        )
    })?;
    let summary = RunSummary::new(&state, &args.run);
    if args.json {
        let text = serde_json::to_string_pretty(&summary).context("serialize run summary")?;
        println!("{text}");
        return Ok(());
    }
    print!("{}", format_summary(&summary));
    Ok(())
}

pub(crate) fn run_resume(global: &GlobalArgs, args: &ResumeArgs) -> Result<()> {
    let ctx = AppContext::load(global)?;
    let request = edit_request(&args.inputs)?;
    let mut orchestrator = open(&ctx, &args.run)?;
    if orchestrator.state().is_complete() {
        println!("nothing to resume; every step is completed");
        print_next(&orchestrator);
        return Ok(());
    }
    authorize_remaining(&ctx, &orchestrator)?;
    let mut progress = progress_source(&ctx, args.no_wait);
    let result = orchestrator.resume(&request, progress.as_mut(), extraction_printer());
    let ran = with_hint(result, &orchestrator)?;
    println!("completed: {}", step_list(&ran));
    print_next(&orchestrator);
    Ok(())
}

pub(crate) fn run_run(global: &GlobalArgs, args: &RunArgs) -> Result<()> {
    let ctx = AppContext::load(global)?;
    for entry in [
        EntryPoint::UploadRfp,
        EntryPoint::Generate,
        EntryPoint::Edit,
        EntryPoint::Finalize,
    ] {
        ctx.authorize(entry)?;
    }
    let batch = validated_rfp_batch(&ctx, &args.run, &args.files)?;
    let request = edit_request(&args.inputs)?;
    let mut orchestrator = open(&ctx, &args.run)?;
    let mut progress = progress_source(&ctx, args.no_wait);
    let result = orchestrator.run_all(
        &batch,
        &request,
        progress.as_mut(),
        extraction_printer(),
        args.restart,
    );
    let ran = with_hint(result, &orchestrator)?;
    println!("completed: {}", step_list(&ran));
    print!("{}", format_summary(&orchestrator.summary()));
    Ok(())
}

pub(crate) fn run_company_docs(global: &GlobalArgs, command: &CompanyDocsCommand) -> Result<()> {
    let ctx = AppContext::load(global)?;
    ctx.authorize(EntryPoint::CompanyDocs)?;
    let service = ctx.service();
    match command {
        CompanyDocsCommand::Upload(args) => {
            let candidates = UploadCandidate::from_paths(&args.files)?;
            let batch = UploadPolicy::company_docs().validate(candidates)?;
            let parts = batch.read_parts()?;
            let uploaded = service.upload_company_docs(&parts)?;
            println!("{}", uploaded.message);
            println!("vector store: {}", uploaded.vector_store_id);
        }
        CompanyDocsCommand::Status(args) => {
            let status = service.check_company_docs()?;
            if args.json {
                let text =
                    serde_json::to_string_pretty(&status).context("serialize company docs")?;
                println!("{text}");
            } else if status.exists {
                println!("company documents: {}", status.count);
                if let Some(id) = status.vector_store_id.as_deref() {
                    println!("vector store: {id}");
                }
                if let Some(updated) = status.last_updated.as_deref() {
                    println!("last updated: {updated}");
                }
            } else {
                println!("no company documents uploaded");
            }
        }
    }
    Ok(())
}

pub(crate) fn run_reset_password(global: &GlobalArgs, args: &ResetPasswordArgs) -> Result<()> {
    let request = PasswordResetRequest {
        email: args.email.trim().to_string(),
        new_password: args.new_password.clone(),
        confirm_password: args.confirm_password.clone(),
    };
    validate_password_reset(&request)?;
    let ctx = AppContext::load(global)?;
    ctx.authorize(EntryPoint::PasswordReset)?;
    let reply = ctx.anonymous_service().direct_password_reset(&request)?;
    if reply.message.is_empty() {
        println!("password reset for {}", request.email);
    } else {
        println!("{}", reply.message);
    }
    Ok(())
}

pub(crate) fn run_config(global: &GlobalArgs, args: &ConfigArgs) -> Result<()> {
    if args.init {
        let path = match global.config.clone() {
            Some(path) => path,
            None => config::default_config_path()
                .ok_or_else(|| anyhow!("no config directory on this platform; pass --config"))?,
        };
        if path.exists() && !args.force {
            return Err(anyhow!(
                "config already exists at {} (pass --force to overwrite)",
                path.display()
            ));
        }
        config::write_config(&path, &config::default_config())?;
        println!("wrote {}", path.display());
        return Ok(());
    }
    let ctx = AppContext::load(global)?;
    match ctx.config.source.as_deref() {
        Some(path) => eprintln!("config: {}", path.display()),
        None => eprintln!("config: defaults (no config file)"),
    }
    if let Some(path) = ctx.session_path.as_deref() {
        eprintln!("session: {}", path.display());
    }
    let mut effective = ctx.config.config.clone();
    effective.api_base_url = ctx.api_url.clone();
    let text = serde_json::to_string_pretty(&effective).context("serialize client config")?;
    println!("{text}");
    Ok(())
}

fn open(ctx: &AppContext, run_dir: &Path) -> Result<Orchestrator<RfpService>> {
    Orchestrator::open(ctx.service(), RunStore::new(run_dir.to_path_buf()))
}

/// Validate a new batch for `run_dir`.
///
/// On rejection, files still staged by an unfinished upload in that run are
/// dropped so `resume` cannot send them in place of the rejected batch.
fn validated_rfp_batch(
    ctx: &AppContext,
    run_dir: &Path,
    files: &[PathBuf],
) -> Result<ValidatedBatch> {
    let rejected = match UploadCandidate::from_paths(files) {
        Ok(candidates) => match UploadPolicy::rfp().validate(candidates) {
            Ok(batch) => return Ok(batch),
            Err(err) => anyhow::Error::from(err),
        },
        Err(err) => err,
    };
    if RunStore::new(run_dir.to_path_buf()).exists() {
        let discarded =
            open(ctx, run_dir).and_then(|mut orchestrator| orchestrator.discard_staged_batch());
        match discarded {
            Ok(true) => eprintln!("dropped the files staged for the unfinished upload"),
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not drop staged files"),
        }
    }
    Err(rejected)
}

fn progress_source(ctx: &AppContext, no_wait: bool) -> Box<dyn ProgressSource> {
    if no_wait {
        Box::new(SimulatedProgress::immediate())
    } else {
        Box::new(SimulatedProgress::new(&ctx.config.config.progress))
    }
}

fn edit_request(inputs: &EditInputs) -> Result<EditRequest> {
    let edits = match inputs.edits.as_deref() {
        Some(path) => {
            let bytes = fs::read(path).with_context(|| format!("read edits {}", path.display()))?;
            serde_json::from_slice::<ResponseEdits>(&bytes)
                .with_context(|| format!("parse edits {}", path.display()))?
        }
        None => ResponseEdits::default(),
    };
    if let Some(path) = inputs.edits.as_deref() {
        if edits.is_empty() {
            tracing::warn!(path = %path.display(), "edits file has no entries");
        }
    }
    Ok(EditRequest {
        edits,
        prompt: inputs.prompt.clone(),
    })
}

/// Gate every step `resume` may run.
fn authorize_remaining(ctx: &AppContext, orchestrator: &Orchestrator<RfpService>) -> Result<()> {
    let Some(first) = orchestrator.state().next_step() else {
        return Ok(());
    };
    for step in MacroStep::ALL.iter().skip(first.index()) {
        let entry = match step {
            MacroStep::Upload => EntryPoint::UploadRfp,
            MacroStep::Generate => EntryPoint::Generate,
            MacroStep::Edit => EntryPoint::Edit,
            MacroStep::Finalize => EntryPoint::Finalize,
        };
        ctx.authorize(entry)?;
    }
    Ok(())
}

/// Print a line each time an extraction stage settles.
fn extraction_printer() -> impl FnMut(&ExtractionSnapshot) {
    let mut reported = 0usize;
    move |snapshot| {
        let settled: Vec<_> = snapshot
            .stages
            .iter()
            .filter(|state| matches!(state.status, StageStatus::Completed | StageStatus::Error))
            .collect();
        for state in settled.iter().skip(reported) {
            eprintln!(
                "  [{:>3.0}%] {} {}",
                snapshot.overall_progress,
                state.stage,
                state.status
            );
        }
        reported = settled.len();
    }
}

/// Print the next command when a step fails or is blocked, then pass the error on.
fn with_hint<T>(result: Result<T>, orchestrator: &Orchestrator<RfpService>) -> Result<T> {
    if let Err(err) = &result {
        let run_dir = orchestrator.store().paths().root();
        match err.downcast_ref::<WorkflowError>() {
            Some(WorkflowError::AlreadyCompleted { step: MacroStep::Upload }) => {
                eprintln!("hint: pass --restart to discard this run and upload again");
            }
            Some(WorkflowError::AlreadyCompleted { .. }) => {
                eprintln!("hint: pass --rerun to run it again");
            }
            Some(WorkflowError::StepFailed { source, .. }) => {
                if source.is_network() {
                    eprintln!("hint: the backend could not be reached; check --api-url");
                }
                eprintln!("next: {}", orchestrator.next_action().command(run_dir));
            }
            Some(WorkflowError::NotReady { .. }) | Some(WorkflowError::MismatchedRfp { .. }) => {
                eprintln!("next: {}", orchestrator.next_action().command(run_dir));
            }
            Some(WorkflowError::RunInUse { .. }) | None => {}
        }
    }
    result
}

fn print_next(orchestrator: &Orchestrator<RfpService>) {
    let action = orchestrator.next_action();
    let command = action.command(orchestrator.store().paths().root());
    match action {
        NextAction::Download => println!("proposal finalized; next: {command}"),
        _ => println!("next: {command}"),
    }
}

fn step_list(steps: &[MacroStep]) -> String {
    steps
        .iter()
        .map(|step| step.command())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("run: {} ({})\n", summary.run_id, summary.run_dir.display()));
    if let Some(rfp_id) = summary.rfp_id.as_deref() {
        out.push_str(&format!("rfp: {rfp_id}\n"));
    }
    for record in &summary.steps {
        out.push_str(&format!("  {:<18} {}", record.step.label(), record.status));
        if let Some(failure) = record.failure.as_ref() {
            out.push_str(&format!(" ({})", failure.message));
        }
        out.push('\n');
    }
    if let Some(extraction) = summary.extraction.as_ref() {
        out.push_str(&format!(
            "extraction: {:.0}%",
            extraction.overall_progress
        ));
        if let Some(stage) = extraction.current_stage() {
            out.push_str(&format!(", {} {}", stage.stage, stage.status));
        }
        if let Some(error) = extraction.error.as_deref() {
            out.push_str(&format!(" ({error})"));
        }
        out.push('\n');
    }
    out.push_str(&format!("next: {}\n", summary.next_command));
    out
}
