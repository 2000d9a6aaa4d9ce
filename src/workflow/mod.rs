//! Workflow orchestration for an RFP run.
//!
//! A run moves through four macro-steps (upload, generate, edit, finalize);
//! the upload step also drives the six extraction stages. State lives in a run
//! directory so each CLI invocation can pick up where the last one stopped.
mod commands;
mod context;
mod orchestrator;
mod progress;
mod stages;
mod state;
mod store;

pub(crate) use commands::{
    run_company_docs, run_config, run_download, run_edit, run_finalize, run_generate,
    run_reset_password, run_resume, run_run, run_status, run_upload,
};
pub use state::MacroStep;
