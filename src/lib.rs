pub mod cluster_argument_parsing;
pub mod clusterer;
pub mod delta;
pub mod error;
pub mod external_command_checker;
pub mod finch;
pub mod genome_set;
pub mod genome_stats;
pub mod job_runner;
pub mod mash;
pub mod nucmer;
pub mod output;
pub mod pair_tables;
pub mod similarity_graph;

#[macro_use]
extern crate log;
extern crate clap;
extern crate rayon;

use crate::error::CorellaError;
use crate::genome_set::GenomeSet;
use crate::pair_tables::PairMetricTable;

/// Source of the fast, approximate distances used for preclustering.
pub trait PreclusterDistanceFinder {
    /// Similarity between pairs of genomes. Pairs may appear in either or
    /// both orders, and pairs missing from the table are not linked.
    fn distances(&self, genomes: &GenomeSet) -> Result<PairMetricTable, CorellaError>;

    fn method_name(&self) -> &str;

    /// External commands distances() would run, for dry runs.
    fn dry_run_commands(&self, _genomes: &GenomeSet) -> Vec<String> {
        vec![]
    }
}

pub const DEFAULT_PRECLUSTER_ANI: &str = "90";
pub const DEFAULT_ANI: &str = "99";
pub const DEFAULT_ALIGNED_FRACTION: &str = "50";
pub const DEFAULT_PRECLUSTER_METHOD: &str = "mash";
pub const DEFAULT_NUM_HASHES: &str = "1000";
pub const DEFAULT_KMER_LENGTH: &str = "21";
pub const DEFAULT_NUCMER_MIN_CLUSTER: &str = "65";
pub const DEFAULT_NUCMER_MAX_GAP: &str = "1";
pub const DEFAULT_NUCMER_METHOD: &str = "mum";
pub const DEFAULT_WORK_DIRECTORY: &str = "corella_work";
