use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rayon::prelude::*;

use crate::delta::parse_alignment_outputs;
use crate::error::CorellaError;
use crate::genome_set::GenomeSet;
use crate::genome_stats::{genome_lengths, GenomeLengths};
use crate::job_runner::{run_pairwise_jobs, AlignmentCommandTemplate, FailedJob, JobBatchOutcome};
use crate::pair_tables::{PairAlignmentTable, PairMetricTable};
use crate::similarity_graph::{
    build_graph, cluster_graph, AlignmentThreshold, ClusterAssignment, SimilarityThreshold,
};
use crate::PreclusterDistanceFinder;

#[derive(Debug, Clone)]
pub struct ClusteringParameters {
    /// Precluster rows need similarity strictly above this, as a fraction
    pub precluster_threshold: f64,
    /// Alignments need identity strictly above this, as a fraction
    pub ani_threshold: f64,
    /// Alignments need reference coverage strictly above this, as a fraction
    pub min_aligned_fraction: f64,
    pub skip_precluster: bool,
    pub skip_cluster: bool,
    /// Alignment outputs go to `<work_directory>/fine/<precluster_id>/`
    pub work_directory: PathBuf,
    pub threads: usize,
    pub dry_run: bool,
    pub job_timeout: Option<Duration>,
    /// Align within several preclusters at once rather than one at a time.
    /// The total number of alignment processes is still at most `threads`.
    pub parallel_preclusters: bool,
}

impl Default for ClusteringParameters {
    fn default() -> ClusteringParameters {
        ClusteringParameters {
            precluster_threshold: 0.90,
            ani_threshold: 0.99,
            min_aligned_fraction: 0.5,
            skip_precluster: false,
            skip_cluster: false,
            work_directory: PathBuf::from("corella_work"),
            threads: 1,
            dry_run: false,
            job_timeout: None,
            parallel_preclusters: false,
        }
    }
}

impl ClusteringParameters {
    /// Thresholds must be fractions and at least one worker thread is needed.
    pub fn validate(&self) -> Result<(), CorellaError> {
        for (name, value) in &[
            ("precluster threshold", self.precluster_threshold),
            ("ANI threshold", self.ani_threshold),
            ("minimum aligned fraction", self.min_aligned_fraction),
        ] {
            if !(0.0..=1.0).contains(value) {
                return Err(CorellaError::InvalidParameter(format!(
                    "{} must be between 0 and 1, found {}",
                    name, value
                )));
            }
        }
        if self.threads == 0 {
            return Err(CorellaError::InvalidParameter(
                "at least 1 thread is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the pipeline has got to, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringStage {
    PreclusterPending,
    PreclusterDone,
    ClusterPending,
    Merged,
}

impl fmt::Display for ClusteringStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            ClusteringStage::PreclusterPending => "preclustering all genomes",
            ClusteringStage::PreclusterDone => "preclustering finished",
            ClusteringStage::ClusterPending => "aligning within each precluster",
            ClusteringStage::Merged => "cluster labels merged",
        };
        write!(f, "{}", description)
    }
}

fn enter_stage(stage: ClusteringStage) {
    info!("Stage: {}", stage);
}

/// Genome to `<precluster>_<cluster>` label, or `<precluster>` when
/// alignment clustering is skipped. In input genome order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HierarchicalClusterAssignment {
    labels: Vec<(String, String)>,
    name_to_index: BTreeMap<String, usize>,
}

impl HierarchicalClusterAssignment {
    fn from_labels(labels: Vec<(String, String)>) -> HierarchicalClusterAssignment {
        let name_to_index = labels
            .iter()
            .enumerate()
            .map(|(i, (g, _))| (g.clone(), i))
            .collect();
        HierarchicalClusterAssignment {
            labels,
            name_to_index,
        }
    }

    pub fn get(&self, genome: &str) -> Option<&str> {
        self.name_to_index
            .get(genome)
            .map(|i| self.labels[*i].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(g, l)| (g.as_str(), l.as_str()))
    }

    pub fn num_clusters(&self) -> usize {
        let mut distinct: Vec<&str> = self.labels.iter().map(|(_, l)| l.as_str()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        distinct.len()
    }
}

/// A precluster whose alignment batch could not be used. Its genomes were
/// each given their own cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedPrecluster {
    pub precluster_id: usize,
    pub reason: String,
}

/// Problems which did not stop clustering.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusteringDiagnostics {
    /// Pairs where nothing aligned, whose identity was taken to be 0
    pub degenerate_pairs: Vec<(String, String)>,
    pub failed_jobs: Vec<FailedJob>,
    pub failed_preclusters: Vec<FailedPrecluster>,
}

impl ClusteringDiagnostics {
    pub fn had_degenerate_pair(&self) -> bool {
        !self.degenerate_pairs.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.degenerate_pairs.is_empty()
            && self.failed_jobs.is_empty()
            && self.failed_preclusters.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} degenerate alignment pairs, {} failed alignment jobs, {} failed preclusters",
            self.degenerate_pairs.len(),
            self.failed_jobs.len(),
            self.failed_preclusters.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringOutcome {
    /// None when preclustering was skipped
    pub precluster_table: Option<PairMetricTable>,
    pub precluster_assignment: ClusterAssignment,
    /// None when alignment clustering was skipped
    pub alignment_table: Option<PairAlignmentTable>,
    pub assignment: HierarchicalClusterAssignment,
    pub diagnostics: ClusteringDiagnostics,
    /// Commands which would have been run, in dry run mode
    pub dry_run_commands: Vec<String>,
}

/// Result of aligning and clustering within a single precluster.
struct PreclusterRun {
    precluster_id: usize,
    assignment: ClusterAssignment,
    table: PairAlignmentTable,
    degenerate_pairs: Vec<(String, String)>,
    failed_jobs: Vec<FailedJob>,
    failure: Option<FailedPrecluster>,
    dry_run_commands: Vec<String>,
}

/// Cluster genomes by preclustering them all with the preclusterer, then
/// aligning pairs only within each precluster and clustering those by ANI
/// and aligned fraction.
pub fn cluster<P, T>(
    genomes: &GenomeSet,
    preclusterer: &P,
    aligner: &T,
    parameters: &ClusteringParameters,
) -> Result<ClusteringOutcome, CorellaError>
where
    P: PreclusterDistanceFinder + ?Sized,
    T: AlignmentCommandTemplate + Sync + ?Sized,
{
    parameters.validate()?;
    let names = genomes.names();
    let mut dry_run_commands = vec![];

    enter_stage(ClusteringStage::PreclusterPending);
    let (precluster_table, precluster_assignment) = if parameters.skip_precluster {
        info!("Skipping preclustering, so all genomes are in a single precluster");
        (None, ClusterAssignment::single_cluster(&names))
    } else {
        info!(
            "Preclustering with {} at similarity > {}",
            preclusterer.method_name(),
            parameters.precluster_threshold
        );
        let table = if parameters.dry_run {
            dry_run_commands.extend(preclusterer.dry_run_commands(genomes));
            vec![]
        } else {
            preclusterer.distances(genomes)?
        };
        let graph = build_graph(
            &table,
            &SimilarityThreshold {
                min_similarity: parameters.precluster_threshold,
            },
            &names,
        )?;
        let assignment = cluster_graph(&graph);
        (Some(table), assignment)
    };
    enter_stage(ClusteringStage::PreclusterDone);

    let preclusters = precluster_assignment.clusters();
    info!(
        "Found {} preclusters. The largest contained {} genomes",
        preclusters.len(),
        preclusters.iter().map(|c| c.len()).max().unwrap_or(0)
    );

    if parameters.skip_cluster {
        info!("Skipping alignment clustering, so preclusters are the final clusters");
        let labels = precluster_assignment
            .iter()
            .map(|(g, c)| (g.to_string(), c.to_string()))
            .collect();
        enter_stage(ClusteringStage::Merged);
        return Ok(ClusteringOutcome {
            precluster_table,
            precluster_assignment,
            alignment_table: None,
            assignment: HierarchicalClusterAssignment::from_labels(labels),
            diagnostics: ClusteringDiagnostics::default(),
            dry_run_commands,
        });
    }

    enter_stage(ClusteringStage::ClusterPending);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parameters.threads)
        .build()?;
    let lengths = if parameters.dry_run {
        GenomeLengths::new()
    } else {
        info!("Calculating genome lengths ..");
        pool.install(|| genome_lengths(genomes))?
    };

    // Concurrent preclusters each run one job at a time, so the pool bounds
    // the total number of alignment processes.
    let jobs_per_precluster = if parameters.parallel_preclusters {
        1
    } else {
        parameters.threads
    };
    let run_one = |(precluster_id, members): (usize, &Vec<&str>)| {
        cluster_within_precluster(
            genomes,
            precluster_id,
            members,
            &lengths,
            aligner,
            parameters,
            jobs_per_precluster,
        )
    };
    let runs: Vec<PreclusterRun> = if parameters.parallel_preclusters {
        pool.install(|| {
            preclusters
                .par_iter()
                .enumerate()
                .map(run_one)
                .collect::<Result<_, _>>()
        })?
    } else {
        preclusters
            .iter()
            .enumerate()
            .map(run_one)
            .collect::<Result<_, _>>()?
    };

    let mut cluster_ids: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut alignment_table = vec![];
    let mut diagnostics = ClusteringDiagnostics::default();
    for run in runs {
        for (genome, cluster_id) in run.assignment.iter() {
            cluster_ids.insert(genome.to_string(), (run.precluster_id, cluster_id));
        }
        alignment_table.extend(run.table);
        diagnostics.degenerate_pairs.extend(run.degenerate_pairs);
        diagnostics.failed_jobs.extend(run.failed_jobs);
        diagnostics.failed_preclusters.extend(run.failure);
        dry_run_commands.extend(run.dry_run_commands);
    }

    let mut labels = Vec::with_capacity(names.len());
    for name in &names {
        let (precluster_id, cluster_id) =
            cluster_ids
                .get(*name)
                .copied()
                .ok_or_else(|| CorellaError::Reference {
                    genome: name.to_string(),
                    context: "merged cluster assignment".to_string(),
                })?;
        labels.push((name.to_string(), format!("{}_{}", precluster_id, cluster_id)));
    }
    enter_stage(ClusteringStage::Merged);

    if diagnostics.is_clean() {
        info!("Clustering finished without problems");
    } else {
        warn!("Clustering finished with {}", diagnostics.summary());
    }

    Ok(ClusteringOutcome {
        precluster_table,
        precluster_assignment,
        alignment_table: Some(alignment_table),
        assignment: HierarchicalClusterAssignment::from_labels(labels),
        diagnostics,
        dry_run_commands,
    })
}

fn precluster_directory(work_directory: &Path, precluster_id: usize) -> PathBuf {
    work_directory.join("fine").join(precluster_id.to_string())
}

/// Align all pairs within one precluster and cluster them. Failures specific
/// to this precluster are recorded in the returned run, leaving its genomes
/// as singletons. Only fatal errors are returned as Err.
fn cluster_within_precluster<T: AlignmentCommandTemplate + Sync + ?Sized>(
    genomes: &GenomeSet,
    precluster_id: usize,
    members: &[&str],
    lengths: &GenomeLengths,
    aligner: &T,
    parameters: &ClusteringParameters,
    concurrency: usize,
) -> Result<PreclusterRun, CorellaError> {
    debug!(
        "Clustering precluster {}, with genomes {:?}",
        precluster_id, members
    );
    let mut run = PreclusterRun {
        precluster_id,
        assignment: ClusterAssignment::singletons(members),
        table: vec![],
        degenerate_pairs: vec![],
        failed_jobs: vec![],
        failure: None,
        dry_run_commands: vec![],
    };
    let fail = |run: &mut PreclusterRun, e: CorellaError| -> Result<(), CorellaError> {
        if e.is_fatal() {
            return Err(e);
        }
        error!(
            "Alignment clustering of precluster {} failed, leaving its genomes unclustered: {}",
            precluster_id, e
        );
        run.failure = Some(FailedPrecluster {
            precluster_id,
            reason: e.to_string(),
        });
        Ok(())
    };

    let subset = genomes.subset(members)?;
    let output_dir = precluster_directory(&parameters.work_directory, precluster_id);
    let outcome = match run_pairwise_jobs(
        &subset,
        &output_dir,
        aligner,
        concurrency,
        parameters.dry_run,
        parameters.job_timeout,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            fail(&mut run, e)?;
            return Ok(run);
        }
    };

    if outcome.all_failed() {
        run.failure = Some(FailedPrecluster {
            precluster_id,
            reason: format!("every {} job failed", aligner.program_name()),
        });
    }
    let outputs = match outcome {
        JobBatchOutcome::DryRun { commands } => {
            run.dry_run_commands = commands;
            return Ok(run);
        }
        JobBatchOutcome::Executed {
            failed, outputs, ..
        } => {
            run.failed_jobs = failed;
            outputs
        }
    };

    // Failed jobs have no output to parse, but the rest still count
    let parsed = match parse_alignment_outputs(&outputs, lengths, precluster_id) {
        Ok(parsed) => parsed,
        Err(e) => {
            fail(&mut run, e)?;
            return Ok(run);
        }
    };
    run.degenerate_pairs = parsed.degenerate_pairs;

    let graph = build_graph(
        &parsed.table,
        &AlignmentThreshold {
            min_identity: parameters.ani_threshold,
            min_reference_coverage: parameters.min_aligned_fraction,
        },
        members,
    )?;
    run.assignment = cluster_graph(&graph);
    run.table = parsed.table;
    debug!(
        "In precluster {}, found {} clusters",
        precluster_id,
        run.assignment.num_clusters()
    );
    Ok(run)
}
