use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bird_tool_utils::clap_utils::{add_clap_verbosity_flags, set_log_level};
use clap::*;

use crate::clusterer::{cluster, ClusteringOutcome, ClusteringParameters};
use crate::error::CorellaError;
use crate::external_command_checker;
use crate::finch::FinchPreclusterer;
use crate::genome_set::GenomeSet;
use crate::mash::MashPreclusterer;
use crate::nucmer::{NucmerCommand, NucmerMethod};
use crate::output;
use crate::{
    PreclusterDistanceFinder, DEFAULT_ALIGNED_FRACTION, DEFAULT_ANI, DEFAULT_KMER_LENGTH,
    DEFAULT_NUCMER_MAX_GAP, DEFAULT_NUCMER_METHOD, DEFAULT_NUCMER_MIN_CLUSTER, DEFAULT_NUM_HASHES,
    DEFAULT_PRECLUSTER_ANI, DEFAULT_PRECLUSTER_METHOD, DEFAULT_WORK_DIRECTORY,
};

/// Parse a percentage given either as 1-100 or as a fraction, returning it
/// as a fraction.
pub fn parse_percentage(
    m: &clap::ArgMatches,
    parameter: &str,
) -> std::result::Result<Option<f64>, String> {
    match m.get_one::<f64>(parameter) {
        Some(value) => {
            let mut percentage = *value;
            if (1.0..=100.0).contains(&percentage) {
                percentage /= 100.0;
            } else if !(0.0..=100.0).contains(&percentage) {
                error!("Invalid percentage: '{}'", percentage);
                return Err(format!(
                    "Invalid percentage specified for --{}: '{}'",
                    parameter, percentage
                ));
            }
            debug!("Using {} {}%", parameter, percentage * 100.0);
            Ok(Some(percentage))
        }
        None => Ok(None),
    }
}

fn required_percentage(m: &clap::ArgMatches, parameter: &str) -> Result<f64, String> {
    parse_percentage(m, parameter)?
        .ok_or_else(|| format!("No value given for --{}", parameter))
}

/// Genome paths from --genome-fasta-files, or from the files in
/// --genome-fasta-directory ending in --genome-fasta-extension, sorted.
pub fn parse_genome_fasta_paths(m: &clap::ArgMatches) -> Result<Vec<String>, String> {
    if let Some(files) = m.get_many::<String>("genome-fasta-files") {
        return Ok(files.cloned().collect());
    }
    let directory = m
        .get_one::<String>("genome-fasta-directory")
        .ok_or("One of --genome-fasta-files or --genome-fasta-directory must be specified")?;
    let extension = m
        .get_one::<String>("genome-fasta-extension")
        .map(|s| s.as_str())
        .unwrap_or("fna");
    let suffix = format!(".{}", extension.trim_start_matches('.'));

    let entries = std::fs::read_dir(directory)
        .map_err(|e| format!("Failed to read genome directory {}: {}", directory, e))?;
    let mut paths = vec![];
    for entry in entries {
        let entry =
            entry.map_err(|e| format!("Failed to read genome directory {}: {}", directory, e))?;
        let path = entry.path();
        if path.is_file() && path.to_string_lossy().ends_with(&suffix) {
            paths.push(path.to_string_lossy().to_string());
        }
    }
    paths.sort();
    if paths.is_empty() {
        return Err(format!(
            "No genome files ending in '{}' found in {}",
            suffix, directory
        ));
    }
    Ok(paths)
}

fn clustering_parameters(m: &clap::ArgMatches) -> Result<ClusteringParameters, String> {
    let threads = *m.get_one::<u16>("threads").unwrap_or(&1);
    let precluster_threshold = required_percentage(m, "precluster-ani")?;
    let ani_threshold = required_percentage(m, "ani")?;
    let min_aligned_fraction = required_percentage(m, "min-aligned-fraction")?;
    if ani_threshold < precluster_threshold {
        warn!(
            "--ani {} is below --precluster-ani {}, so genomes in different preclusters will never be compared even when they would meet the ANI threshold",
            ani_threshold * 100.0,
            precluster_threshold * 100.0
        );
    }

    Ok(ClusteringParameters {
        precluster_threshold,
        ani_threshold,
        min_aligned_fraction,
        skip_precluster: m.get_flag("skip-precluster"),
        skip_cluster: m.get_flag("skip-cluster"),
        work_directory: PathBuf::from(
            m.get_one::<String>("work-directory")
                .map(|s| s.as_str())
                .unwrap_or(DEFAULT_WORK_DIRECTORY),
        ),
        threads: threads as usize,
        dry_run: m.get_flag("dry-run"),
        job_timeout: m
            .get_one::<u64>("job-timeout")
            .map(|secs| Duration::from_secs(*secs)),
        parallel_preclusters: m.get_flag("parallel-preclusters"),
    })
}

fn nucmer_command(m: &clap::ArgMatches) -> Result<NucmerCommand, String> {
    let method = m
        .get_one::<String>("nucmer-method")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_NUCMER_METHOD)
        .parse::<NucmerMethod>()?;
    Ok(NucmerCommand {
        min_cluster: *m.get_one::<u32>("nucmer-min-cluster").unwrap_or(&65),
        max_gap: *m.get_one::<u32>("nucmer-max-gap").unwrap_or(&1),
        no_extend: !m.get_flag("nucmer-extend"),
        method,
    })
}

fn preclusterer(
    m: &clap::ArgMatches,
    parameters: &ClusteringParameters,
) -> Result<Box<dyn PreclusterDistanceFinder>, String> {
    let kmer_length = *m.get_one::<u8>("kmer-length").unwrap_or(&21);
    let num_hashes = *m.get_one::<usize>("num-hashes").unwrap_or(&1000);
    match m
        .get_one::<String>("precluster-method")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_PRECLUSTER_METHOD)
    {
        "mash" => Ok(Box::new(MashPreclusterer {
            work_directory: parameters.work_directory.join("precluster"),
            kmer_length,
            sketch_size: num_hashes,
            threads: parameters.threads as u16,
        })),
        "finch" => Ok(Box::new(FinchPreclusterer {
            num_kmers: num_hashes,
            kmer_length,
        })),
        other => Err(format!("Unknown precluster method '{}'", other)),
    }
}

fn write_outputs(
    m: &clap::ArgMatches,
    genomes: &GenomeSet,
    outcome: &ClusteringOutcome,
) -> Result<(), CorellaError> {
    if let Some(path) = m.get_one::<String>("output-precluster-table") {
        match &outcome.precluster_table {
            Some(table) => output::write_precluster_table_file(Path::new(path), table)?,
            None => warn!("Preclustering was skipped, so not writing {}", path),
        }
    }
    if let Some(path) = m.get_one::<String>("output-alignment-table") {
        match &outcome.alignment_table {
            Some(table) => output::write_alignment_table_file(Path::new(path), table)?,
            None => warn!("Alignment clustering was skipped, so not writing {}", path),
        }
    }
    if let Some(path) = m.get_one::<String>("output-cluster-definition") {
        output::write_cluster_definition_file(Path::new(path), genomes, &outcome.assignment)?;
    }
    Ok(())
}

fn print_dry_run_commands(commands: &[String]) -> Result<(), CorellaError> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    for command in commands {
        writeln!(handle, "{}", command).map_err(|e| CorellaError::io("stdout", e))?;
    }
    Ok(())
}

fn run_cluster(m: &clap::ArgMatches) -> Result<(), String> {
    let genome_fasta_files = parse_genome_fasta_paths(m)?;
    info!("Read in {} genome paths", genome_fasta_files.len());
    let genomes = GenomeSet::from_paths(&genome_fasta_files).map_err(|e| e.to_string())?;

    let parameters = clustering_parameters(m)?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(parameters.threads)
        .build_global()
        .map_err(|e| format!("Failed to initialise worker threads: {}", e))?;
    let aligner = nucmer_command(m)?;
    let preclusterer = preclusterer(m, &parameters)?;

    if !parameters.dry_run {
        external_command_checker::check_for_dependencies(
            preclusterer.method_name(),
            parameters.skip_precluster,
            parameters.skip_cluster,
        );
    }

    let outcome = cluster(&genomes, preclusterer.as_ref(), &aligner, &parameters)
        .map_err(|e| e.to_string())?;
    info!(
        "Found {} clusters amongst {} genomes",
        outcome.assignment.num_clusters(),
        genomes.len()
    );
    if !outcome.diagnostics.is_clean() {
        warn!("There were problems: {}", outcome.diagnostics.summary());
        for failure in &outcome.diagnostics.failed_preclusters {
            warn!(
                "Precluster {} was not clustered by alignment: {}",
                failure.precluster_id, failure.reason
            );
        }
    }

    if parameters.dry_run {
        print_dry_run_commands(&outcome.dry_run_commands).map_err(|e| e.to_string())?;
    }
    write_outputs(m, &genomes, &outcome).map_err(|e| e.to_string())?;
    info!("Finished");
    Ok(())
}

pub fn run_cluster_subcommand(matches: &clap::ArgMatches, program_name: &str, version: &str) {
    let m = match matches.subcommand_matches("cluster") {
        Some(m) => m,
        None => {
            error!("Programming error: cluster subcommand not found");
            std::process::exit(1);
        }
    };
    set_log_level(m, true, program_name, version);

    if let Err(e) = run_cluster(m) {
        error!("{}", e);
        std::process::exit(1);
    }
}

pub fn add_cluster_subcommand(app: clap::Command) -> clap::Command {
    let cluster_subcommand = add_clap_verbosity_flags(
        Command::new("cluster")
            .about("Cluster FASTA files by MinHash preclustering then nucmer ANI")
            .arg(
                Arg::new("genome-fasta-files")
                    .long("genome-fasta-files")
                    .help("Genome FASTA files to cluster")
                    .num_args(1..)
                    .action(ArgAction::Append),
            )
            .arg(
                Arg::new("genome-fasta-directory")
                    .long("genome-fasta-directory")
                    .help("Directory containing the genome FASTA files to cluster"),
            )
            .arg(
                Arg::new("genome-fasta-extension")
                    .long("genome-fasta-extension")
                    .help("File extension of genomes in --genome-fasta-directory")
                    .default_value("fna"),
            )
            .group(
                ArgGroup::new("genomes")
                    .args(["genome-fasta-files", "genome-fasta-directory"])
                    .required(true),
            )
            .arg(
                Arg::new("work-directory")
                    .long("work-directory")
                    .help("Directory for sketches and alignment outputs")
                    .default_value(DEFAULT_WORK_DIRECTORY),
            )
            .arg(
                Arg::new("precluster-method")
                    .long("precluster-method")
                    .help("MinHash implementation used for preclustering: 'mash' runs the external mash tool, 'finch' sketches internally")
                    .value_parser(["mash", "finch"])
                    .default_value(DEFAULT_PRECLUSTER_METHOD),
            )
            .arg(
                Arg::new("precluster-ani")
                    .long("precluster-ani")
                    .help("Require MinHash similarity above this for genomes to share a precluster")
                    .value_parser(value_parser!(f64))
                    .default_value(DEFAULT_PRECLUSTER_ANI),
            )
            .arg(
                Arg::new("ani")
                    .long("ani")
                    .help("Require alignment identity above this for genomes to share a cluster")
                    .value_parser(value_parser!(f64))
                    .default_value(DEFAULT_ANI),
            )
            .arg(
                Arg::new("min-aligned-fraction")
                    .long("min-aligned-fraction")
                    .help("Require the alignment to cover more than this percentage of the reference genome")
                    .value_parser(value_parser!(f64))
                    .default_value(DEFAULT_ALIGNED_FRACTION),
            )
            .arg(
                Arg::new("skip-precluster")
                    .long("skip-precluster")
                    .help("Put all genomes in a single precluster, aligning every pair")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("skip-cluster")
                    .long("skip-cluster")
                    .help("Report preclusters as the final clusters, without aligning")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("dry-run")
                    .long("dry-run")
                    .help(
                        "Print the external commands which would be run, without running them. \
                        Preclustering is not computed, so unless --skip-precluster is given \
                        every genome is its own precluster and only self-alignment commands \
                        are shown",
                    )
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("job-timeout")
                    .long("job-timeout")
                    .help("Kill alignment jobs running longer than this many seconds")
                    .value_parser(value_parser!(u64)),
            )
            .arg(
                Arg::new("parallel-preclusters")
                    .long("parallel-preclusters")
                    .help("Align within several preclusters at once rather than one at a time")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("nucmer-min-cluster")
                    .long("nucmer-min-cluster")
                    .help("Minimum length of a cluster of matches (nucmer -c)")
                    .value_parser(value_parser!(u32))
                    .default_value(DEFAULT_NUCMER_MIN_CLUSTER),
            )
            .arg(
                Arg::new("nucmer-max-gap")
                    .long("nucmer-max-gap")
                    .help("Maximum gap between adjacent matches in a cluster (nucmer -g)")
                    .value_parser(value_parser!(u32))
                    .default_value(DEFAULT_NUCMER_MAX_GAP),
            )
            .arg(
                Arg::new("nucmer-extend")
                    .long("nucmer-extend")
                    .help("Let nucmer extend alignments beyond clusters, which is slower")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("nucmer-method")
                    .long("nucmer-method")
                    .help("Anchor match type used by nucmer")
                    .value_parser(["mum", "mumreference", "maxmatch"])
                    .default_value(DEFAULT_NUCMER_METHOD),
            )
            .arg(
                Arg::new("num-hashes")
                    .long("num-hashes")
                    .help("Number of hashes to use for each genome in MinHash")
                    .value_parser(value_parser!(usize))
                    .default_value(DEFAULT_NUM_HASHES),
            )
            .arg(
                Arg::new("kmer-length")
                    .long("kmer-length")
                    .help("Kmer length to use in MinHash")
                    .value_parser(value_parser!(u8))
                    .default_value(DEFAULT_KMER_LENGTH),
            )
            .arg(
                Arg::new("threads")
                    .short('t')
                    .long("threads")
                    .help("Number of CPU threads to use")
                    .value_parser(value_parser!(u16))
                    .default_value("1"),
            )
            .arg(
                Arg::new("output-cluster-definition")
                    .long("output-cluster-definition")
                    .help("Output a file of genome<TAB>path<TAB>cluster label")
                    .required(true),
            )
            .arg(
                Arg::new("output-precluster-table")
                    .long("output-precluster-table")
                    .help("Output the MinHash distances as CSV"),
            )
            .arg(
                Arg::new("output-alignment-table")
                    .long("output-alignment-table")
                    .help("Output the alignment statistics of each pair as CSV"),
            ),
    );

    app.subcommand(cluster_subcommand)
}
