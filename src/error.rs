use std::io;
use std::path::PathBuf;

/// The primary error type for all operations in the `pzip` crate.
#[derive(Debug)]
pub enum ArchiverError {
    /// An I/O error, together with the operation that failed and the path it
    /// failed on.
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    /// Invalid pipeline configuration, e.g. a worker count below one.
    Config(String),

    /// A malformed or unsupported archive, or an entry name that cannot be
    /// mapped to a relative output path.
    Format(String),

    /// A compressor or decompressor failure on the given path.
    Codec {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    /// An error occurred when trying to strip a prefix from a file path.
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// The shared cancellation token was canceled before the work completed.
    Canceled,

    /// A wrapper for anything that doesn't fit the specific variants.
    Other(String),
}

impl ArchiverError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiverError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn codec(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiverError::Codec {
            op,
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for ArchiverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiverError::Io { op, path, source } => {
                if path.as_os_str().is_empty() {
                    write!(f, "{}: {}", op, source)
                } else {
                    write!(f, "{} '{}': {}", op, path.display(), source)
                }
            }
            ArchiverError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            ArchiverError::Format(msg) => write!(f, "archive format error: {}", msg),
            ArchiverError::Codec { op, path, source } => {
                write!(f, "{} '{}': {}", op, path.display(), source)
            }
            ArchiverError::StripPrefix { prefix, path } => write!(
                f,
                "could not strip prefix '{}' from path '{}'",
                prefix.display(),
                path.display()
            ),
            ArchiverError::Canceled => write!(f, "operation canceled"),
            ArchiverError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ArchiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiverError::Io { source, .. } => Some(source),
            ArchiverError::Codec { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Generic IO error conversion for call sites that have no path context.
impl From<io::Error> for ArchiverError {
    fn from(err: io::Error) -> Self {
        ArchiverError::Io {
            op: "I/O error",
            path: PathBuf::new(),
            source: err,
        }
    }
}
