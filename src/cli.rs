//! CLI argument parsing for the RFP workflow.
//!
//! Each subcommand is one user-initiated event against a run directory; the
//! orchestration itself lives in `workflow`.
use crate::model::DocType;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rfpflow",
    version,
    about = "Upload RFPs and drive response generation against the RFP backend",
    after_help = "Commands:\n  upload --run <dir> <files>...   Validate and upload RFP documents\n  generate --run <dir>            Generate an AI response draft\n  edit --run <dir>                Apply edits and review the draft\n  finalize --run <dir>            Produce the final proposal documents\n  download --run <dir>            Save a finalized document\n  status --run <dir>              Summarize the run and next action\n  resume --run <dir>              Continue from the first unfinished step\n  run --run <dir> <files>...      Upload and run every step\n\nExamples:\n  rfpflow upload --run ./tender tender.pdf annex.xlsx\n  rfpflow generate --run ./tender\n  rfpflow edit --run ./tender --edits edits.json --prompt \"shorter answers\"\n  rfpflow finalize --run ./tender\n  rfpflow download --run ./tender --doc-type pdf\n  rfpflow status --run ./tender --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Client config file (defaults to <config dir>/rfpflow/config.json)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Session identity file
    #[arg(long, value_name = "PATH", global = true)]
    pub session: Option<PathBuf>,

    /// Backend base URL (overrides RFPFLOW_API_URL and the config file)
    #[arg(long, value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Log workflow events to stderr
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Upload(UploadArgs),
    Generate(StepArgs),
    Edit(EditArgs),
    Finalize(StepArgs),
    Download(DownloadArgs),
    Status(StatusArgs),
    Resume(ResumeArgs),
    Run(RunArgs),
    #[command(subcommand)]
    CompanyDocs(CompanyDocsCommand),
    ResetPassword(ResetPasswordArgs),
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Validate and upload RFP documents, then track extraction")]
pub struct UploadArgs {
    /// Run directory holding the workflow state
    #[arg(long, value_name = "DIR")]
    pub run: PathBuf,

    /// Discard an existing run in DIR and start over
    #[arg(long)]
    pub restart: bool,

    /// Show extraction progress without delays
    #[arg(long)]
    pub no_wait: bool,

    /// PDF, Word or Excel files (10MB max each)
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

/// Shared inputs for generate and finalize.
#[derive(Parser, Debug)]
pub struct StepArgs {
    /// Run directory holding the workflow state
    #[arg(long, value_name = "DIR")]
    pub run: PathBuf,

    /// Run the step again even if it already completed
    #[arg(long)]
    pub rerun: bool,
}

/// Edit inputs shared by edit, resume and run.
#[derive(Args, Debug, Clone, Default)]
pub struct EditInputs {
    /// JSON file of edits: {"sections": {id: text}, "questions": {...}, "requirements": {...}}
    #[arg(long, value_name = "PATH")]
    pub edits: Option<PathBuf>,

    /// Instruction for a remote refinement of the draft
    #[arg(long, value_name = "TEXT")]
    pub prompt: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Apply edits to the generated draft and mark it reviewed")]
pub struct EditArgs {
    /// Run directory holding the workflow state
    #[arg(long, value_name = "DIR")]
    pub run: PathBuf,

    #[command(flatten)]
    pub inputs: EditInputs,

    /// Run the step again even if it already completed
    #[arg(long)]
    pub rerun: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Download a finalized proposal document")]
pub struct DownloadArgs {
    /// Run directory holding the workflow state
    #[arg(long, value_name = "DIR")]
    pub run: PathBuf,

    /// Document format
    #[arg(long, value_enum)]
    pub doc_type: DocType,

    /// Destination directory (defaults to <run>/downloads)
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// File name (defaults to <rfp_id>_proposal.<ext>)
    #[arg(long, value_name = "NAME")]
    pub filename: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Summarize run status and next action")]
pub struct StatusArgs {
    /// Run directory holding the workflow state
    #[arg(long, value_name = "DIR")]
    pub run: PathBuf,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Continue a run from its first unfinished step")]
pub struct ResumeArgs {
    /// Run directory holding the workflow state
    #[arg(long, value_name = "DIR")]
    pub run: PathBuf,

    #[command(flatten)]
    pub inputs: EditInputs,

    /// Show extraction progress without delays
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Upload documents and run every step through finalize")]
pub struct RunArgs {
    /// Run directory holding the workflow state
    #[arg(long, value_name = "DIR")]
    pub run: PathBuf,

    #[command(flatten)]
    pub inputs: EditInputs,

    /// Discard an existing run in DIR and start over
    #[arg(long)]
    pub restart: bool,

    /// Show extraction progress without delays
    #[arg(long)]
    pub no_wait: bool,

    /// PDF, Word or Excel files (10MB max each)
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(about = "Manage the company knowledge base used for generation")]
pub enum CompanyDocsCommand {
    /// Upload company PDFs to the knowledge base
    Upload(CompanyDocsUploadArgs),
    /// Show whether company documents are present
    Status(CompanyDocsStatusArgs),
}

#[derive(Parser, Debug)]
pub struct CompanyDocsUploadArgs {
    /// PDF files (10MB max each)
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct CompanyDocsStatusArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Reset an account password without the old password")]
pub struct ResetPasswordArgs {
    #[arg(long)]
    pub email: String,

    #[arg(long, value_name = "PASSWORD")]
    pub new_password: String,

    #[arg(long, value_name = "PASSWORD")]
    pub confirm_password: String,
}

#[derive(Parser, Debug)]
#[command(about = "Show the effective client config or write a default one")]
pub struct ConfigArgs {
    /// Write the default config file
    #[arg(long)]
    pub init: bool,

    /// Overwrite an existing config file
    #[arg(long, requires = "init")]
    pub force: bool,
}
