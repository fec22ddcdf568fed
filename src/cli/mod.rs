//! Command-line definitions and driver facades for the `pzip` and `punzip`
//! binaries.

use clap::Parser;
use std::fs::File;
use std::path::PathBuf;

use crate::archive::Archiver;
use crate::cancel::CancelToken;
use crate::extract::Extractor;
use crate::ArchiverError;

/// Arguments of the `pzip` binary.
#[derive(Parser, Debug)]
#[command(
    name = "pzip",
    version,
    about = "pzip is a tool for archiving files concurrently."
)]
pub struct ArchiveArgs {
    /// Allow up to n concurrent compression workers. [0 fails; defaults to
    /// the number of available hardware threads]
    #[arg(long, default_value_t = num_cpus::get())]
    pub concurrency: usize,

    /// The path of the archive to create.
    pub archive: PathBuf,

    /// One or more files or directories to archive.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Arguments of the `punzip` binary.
#[derive(Parser, Debug)]
#[command(
    name = "punzip",
    version,
    about = "punzip is a tool for extracting files concurrently."
)]
pub struct ExtractArgs {
    /// Allow up to n concurrent extraction workers. [0 fails; defaults to
    /// the number of available hardware threads]
    #[arg(long, default_value_t = num_cpus::get())]
    pub concurrency: usize,

    /// The directory to extract into.
    #[arg(short = 'd', value_name = "OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// The archive to extract.
    pub archive: PathBuf,
}

/// Driver facade for the archive direction: create the destination, run the
/// pipeline, write the central directory.
pub struct ArchiverCli {
    pub archive_path: PathBuf,
    pub files: Vec<PathBuf>,
    pub concurrency: usize,
}

impl ArchiverCli {
    pub fn run(&self, token: &CancelToken) -> Result<(), ArchiverError> {
        let dest = File::create(&self.archive_path)
            .map_err(|e| ArchiverError::io("create archive at", self.archive_path.as_path(), e))?;

        let mut archiver = Archiver::new(dest, self.concurrency)?;
        let archived = archiver.archive(token, &self.files);
        let closed = archiver.close();

        archived?;
        closed
    }
}

/// Driver facade for the extract direction.
pub struct ExtractorCli {
    pub archive_path: PathBuf,
    pub output_dir: PathBuf,
    pub concurrency: usize,
}

impl ExtractorCli {
    pub fn run(&self, token: &CancelToken) -> Result<(), ArchiverError> {
        let extractor = Extractor::new(&self.output_dir, self.concurrency)?;
        extractor.extract(token, &self.archive_path)
    }
}
