//! Entry point for the `pzip` archiver binary.

use std::process::ExitCode;

use clap::Parser;

use pzip::cancel::CancelToken;
use pzip::cli::{ArchiveArgs, ArchiverCli};

fn main() -> ExitCode {
    let args = ArchiveArgs::parse();

    let token = CancelToken::new();
    let sigint_token = token.clone();
    ctrlc::set_handler(move || sigint_token.cancel()).ok();

    let cli = ArchiverCli {
        archive_path: args.archive.clone(),
        files: args.files,
        concurrency: args.concurrency,
    };

    if let Err(err) = cli.run(&token) {
        // Never leave a partially written archive behind.
        let _ = std::fs::remove_file(&args.archive);
        eprintln!("pzip: {}", err);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
