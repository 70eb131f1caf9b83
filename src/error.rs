use std::path::PathBuf;

use thiserror::Error;

/// Errors which abort a clustering run, or a single precluster's batch when
/// raised while aligning within that precluster.
#[derive(Debug, Error)]
pub enum CorellaError {
    #[error("genome '{genome}' referenced by {context} is not among the input genomes")]
    Reference { genome: String, context: String },

    #[error("malformed alignment record in {} line {line_number}: '{line}'", path.display())]
    MalformedRecord {
        path: PathBuf,
        line_number: usize,
        line: String,
    },

    #[error("alignment output file name {} does not follow <query>_vs_<reference>", path.display())]
    MalformedFileName { path: PathBuf },

    #[error("genome name '{name}' is derived from both {first} and {second}")]
    DuplicateGenome {
        name: String,
        first: String,
        second: String,
    },

    #[error("genome name '{name}' from {path} contains '_vs_', which separates the two genomes in alignment output names")]
    ReservedGenomeName { name: String, path: String },

    #[error("failed to read genome sequences from {path}: {message}")]
    GenomeRead { path: String, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {message}")]
    CoarseTool { tool: String, message: String },

    #[error("error parsing {context}: {source}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl CorellaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> CorellaError {
        CorellaError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors which must abort the whole run rather than a single
    /// precluster's batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CorellaError::Reference { .. }
                | CorellaError::DuplicateGenome { .. }
                | CorellaError::ReservedGenomeName { .. }
                | CorellaError::InvalidParameter(_)
        )
    }
}
