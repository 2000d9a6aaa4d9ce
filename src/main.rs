//! `rfpflow`: drive RFP uploads through response generation from the command line.
mod api;
mod cli;
mod config;
mod error;
mod model;
mod session;
mod upload;
mod workflow;

use anyhow::Result;
use clap::Parser;
use error::ValidationError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "RFPFLOW_LOG";

fn main() -> ExitCode {
    let args = cli::RootArgs::parse();
    init_logging(args.global.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(invalid) = err.downcast_ref::<ValidationError>() {
                eprintln!("error: {invalid}");
                if invalid.rejects_upload() {
                    eprintln!("nothing was uploaded");
                }
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: cli::RootArgs) -> Result<()> {
    let global = &args.global;
    match &args.command {
        cli::Command::Upload(args) => workflow::run_upload(global, args),
        cli::Command::Generate(args) => workflow::run_generate(global, args),
        cli::Command::Edit(args) => workflow::run_edit(global, args),
        cli::Command::Finalize(args) => workflow::run_finalize(global, args),
        cli::Command::Download(args) => workflow::run_download(global, args),
        cli::Command::Status(args) => workflow::run_status(args),
        cli::Command::Resume(args) => workflow::run_resume(global, args),
        cli::Command::Run(args) => workflow::run_run(global, args),
        cli::Command::CompanyDocs(command) => workflow::run_company_docs(global, command),
        cli::Command::ResetPassword(args) => workflow::run_reset_password(global, args),
        cli::Command::Config(args) => workflow::run_config(global, args),
    }
}

/// `RFPFLOW_LOG` wins; otherwise `info` with `--verbose` and `warn` without.
fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
