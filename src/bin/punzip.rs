//! Entry point for the `punzip` extractor binary.

use std::process::ExitCode;

use clap::Parser;

use pzip::cancel::CancelToken;
use pzip::cli::{ExtractArgs, ExtractorCli};

fn main() -> ExitCode {
    let args = ExtractArgs::parse();

    let token = CancelToken::new();
    let sigint_token = token.clone();
    ctrlc::set_handler(move || sigint_token.cancel()).ok();

    let cli = ExtractorCli {
        archive_path: args.archive,
        output_dir: args.output_dir,
        concurrency: args.concurrency,
    };

    if let Err(err) = cli.run(&token) {
        eprintln!("punzip: {}", err);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
