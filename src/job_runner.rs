use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use concurrent_queue::ConcurrentQueue;
use rayon::prelude::*;
use thiserror::Error;

use crate::delta::PAIR_SEPARATOR;
use crate::error::CorellaError;
use crate::genome_set::{Genome, GenomeSet};

/// How to turn one query/reference pair into an external alignment command.
pub trait AlignmentCommandTemplate {
    fn program_name(&self) -> &str;

    /// Extension of the result file the command writes, e.g. "delta".
    fn output_extension(&self) -> &str;

    /// Full argument vector, program first. The command must write its
    /// result to `job.output_file(self.output_extension())`.
    fn command_line(&self, job: &AlignmentJob) -> Vec<String>;
}

/// One pairwise alignment to compute.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentJob {
    pub query: String,
    pub reference: String,
    pub query_path: PathBuf,
    pub reference_path: PathBuf,
    /// Output path without extension, `<dir>/<query>_vs_<reference>`.
    pub output_prefix: PathBuf,
}

impl AlignmentJob {
    fn new(query: &Genome, reference: &Genome, output_dir: &Path) -> AlignmentJob {
        AlignmentJob {
            query: query.name.clone(),
            reference: reference.name.clone(),
            query_path: query.path.clone(),
            reference_path: reference.path.clone(),
            output_prefix: output_dir.join(format!(
                "{}{}{}",
                query.name, PAIR_SEPARATOR, reference.name
            )),
        }
    }

    pub fn output_file(&self, extension: &str) -> PathBuf {
        let mut name = self.output_prefix.clone().into_os_string();
        name.push(".");
        name.push(extension);
        PathBuf::from(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobFailureReason {
    #[error("failed to start: {0}")]
    SpawnFailed(String),
    #[error("exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("killed after running for longer than {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    pub job: AlignmentJob,
    pub command: String,
    pub reason: JobFailureReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobBatchOutcome {
    /// Nothing was run, these are the commands which would have been.
    DryRun { commands: Vec<String> },
    Executed {
        jobs_run: usize,
        failed: Vec<FailedJob>,
        /// Result files present once the batch finished, in job order
        outputs: Vec<PathBuf>,
    },
}

impl JobBatchOutcome {
    pub fn failed_jobs(&self) -> &[FailedJob] {
        match self {
            JobBatchOutcome::DryRun { .. } => &[],
            JobBatchOutcome::Executed { failed, .. } => failed,
        }
    }

    /// True when jobs were run and every one of them failed.
    pub fn all_failed(&self) -> bool {
        match self {
            JobBatchOutcome::DryRun { .. } => false,
            JobBatchOutcome::Executed {
                jobs_run, failed, ..
            } => {
                *jobs_run > 0 && failed.len() == *jobs_run
            }
        }
    }
}

/// Every ordered pair of genomes, self pairs included, writing into
/// output_dir.
pub fn generate_jobs(genomes: &GenomeSet, output_dir: &Path) -> Vec<AlignmentJob> {
    let mut to_return = Vec::with_capacity(genomes.len() * genomes.len());
    for query in genomes.iter() {
        for reference in genomes.iter() {
            to_return.push(AlignmentJob::new(query, reference, output_dir));
        }
    }
    to_return
}

fn render_command(argv: &[String]) -> String {
    argv.join(" ")
}

fn execute_command(argv: &[String], timeout: Option<Duration>) -> Result<(), JobFailureReason> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| JobFailureReason::SpawnFailed("empty command".to_string()))?;
    let mut process = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| JobFailureReason::SpawnFailed(e.to_string()))?;

    // Drain stderr on its own thread so a chatty process cannot block on a
    // full pipe while we wait on it.
    let stderr_reader = process.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        })
    });
    let collect_stderr = |reader: Option<std::thread::JoinHandle<String>>| {
        reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let start = Instant::now();
    let status = loop {
        match process.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if let Some(limit) = timeout {
                    if start.elapsed() > limit {
                        // Children of the killed process may hold stderr
                        // open, so the reader thread is left to finish alone.
                        let _ = process.kill();
                        let _ = process.wait();
                        return Err(JobFailureReason::TimedOut(limit));
                    }
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                let _ = process.kill();
                return Err(JobFailureReason::SpawnFailed(e.to_string()));
            }
        }
    };

    let stderr = collect_stderr(stderr_reader);
    if status.success() {
        Ok(())
    } else {
        Err(JobFailureReason::NonZeroExit {
            code: status.code(),
            stderr,
        })
    }
}

/// Run one alignment for every ordered pair of `genomes`, at most
/// `concurrency` at a time, returning once all have finished. Jobs which fail
/// are reported, not raised, so whatever output exists can still be parsed.
///
/// In dry run mode nothing is run or created and the commands are returned
/// instead.
pub fn run_pairwise_jobs<T: AlignmentCommandTemplate + Sync + ?Sized>(
    genomes: &GenomeSet,
    output_dir: &Path,
    template: &T,
    concurrency: usize,
    dry_run: bool,
    job_timeout: Option<Duration>,
) -> Result<JobBatchOutcome, CorellaError> {
    let jobs = generate_jobs(genomes, output_dir);
    let commands: Vec<Vec<String>> = jobs.iter().map(|j| template.command_line(j)).collect();

    if dry_run {
        return Ok(JobBatchOutcome::DryRun {
            commands: commands.iter().map(|c| render_command(c)).collect(),
        });
    }

    std::fs::create_dir_all(output_dir).map_err(|e| CorellaError::io(output_dir, e))?;
    for job in &jobs {
        let output = job.output_file(template.output_extension());
        if output.exists() {
            debug!("Removing stale output {}", output.display());
            std::fs::remove_file(&output).map_err(|e| CorellaError::io(&output, e))?;
        }
    }

    info!(
        "Running {} {} jobs with {} workers ..",
        jobs.len(),
        template.program_name(),
        concurrency
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()?;

    let failures = ConcurrentQueue::unbounded();
    pool.install(|| {
        jobs.par_iter()
            .zip(commands.par_iter())
            .for_each(|(job, argv)| {
                debug!("Running {} command: {:?}", template.program_name(), argv);
                if let Err(reason) = execute_command(argv, job_timeout) {
                    warn!(
                        "{} of {} against {} failed: {}",
                        template.program_name(),
                        job.query,
                        job.reference,
                        reason
                    );
                    failures
                        .push(FailedJob {
                            job: job.clone(),
                            command: render_command(argv),
                            reason,
                        })
                        .expect("Failed to push to queue of failed jobs");
                }
            });
    });

    let mut failed = vec![];
    while let Ok(f) = failures.pop() {
        failed.push(f);
    }
    failed.sort_by(|a, b| {
        (&a.job.query, &a.job.reference).cmp(&(&b.job.query, &b.job.reference))
    });
    info!(
        "Finished {} {} jobs, {} failed",
        jobs.len(),
        template.program_name(),
        failed.len()
    );

    let outputs = jobs
        .iter()
        .map(|job| job.output_file(template.output_extension()))
        .filter(|output| output.exists())
        .collect();

    Ok(JobBatchOutcome::Executed {
        jobs_run: jobs.len(),
        failed,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Writes the job's query and reference names into its output file, or
    /// runs a fixed command for the named pair.
    struct ShellTemplate {
        override_pair: Option<(String, String, Vec<String>)>,
    }

    impl AlignmentCommandTemplate for ShellTemplate {
        fn program_name(&self) -> &str {
            "sh"
        }
        fn output_extension(&self) -> &str {
            "out"
        }
        fn command_line(&self, job: &AlignmentJob) -> Vec<String> {
            if let Some((q, r, argv)) = &self.override_pair {
                if *q == job.query && *r == job.reference {
                    return argv.clone();
                }
            }
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "echo {} {} > {}",
                    job.query,
                    job.reference,
                    job.output_file("out").display()
                ),
            ]
        }
    }

    fn genomes() -> GenomeSet {
        GenomeSet::from_paths(&["/g/a.fna", "/g/b.fna"]).unwrap()
    }

    #[test]
    fn test_jobs_include_self_pairs() {
        init();
        let jobs = generate_jobs(&genomes(), Path::new("/out"));
        let pairs: Vec<_> = jobs
            .iter()
            .map(|j| (j.query.as_str(), j.reference.as_str()))
            .collect();
        assert_eq!(vec![("a", "a"), ("a", "b"), ("b", "a"), ("b", "b")], pairs);
        assert_eq!(PathBuf::from("/out/a_vs_b.delta"), jobs[1].output_file("delta"));
    }

    #[test]
    fn test_every_job_has_its_own_output() {
        init();
        let genomes =
            GenomeSet::from_paths(&["/g/a.fna", "/g/b_vs.fna", "/g/vs_c.fna", "/g/b.fna"]).unwrap();
        let jobs = generate_jobs(&genomes, Path::new("/out"));
        let mut outputs: Vec<PathBuf> = jobs.iter().map(|j| j.output_file("delta")).collect();
        outputs.sort();
        outputs.dedup();
        assert_eq!(16, jobs.len());
        assert_eq!(16, outputs.len());

        // Names which would make two pairs share an output are refused
        assert!(GenomeSet::from_paths(&["/g/a_vs_b.fna", "/g/c.fna", "/g/a.fna", "/g/b_vs_c.fna"])
            .is_err());
    }

    #[test]
    fn test_dry_run_creates_nothing() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let out = td.path().join("fine");
        let template = ShellTemplate {
            override_pair: None,
        };
        let outcome = run_pairwise_jobs(&genomes(), &out, &template, 2, true, None).unwrap();
        match outcome {
            JobBatchOutcome::DryRun { commands } => {
                assert_eq!(4, commands.len());
                assert!(commands[1].contains("a_vs_b.out"));
            }
            other => panic!("Unexpected outcome {:?}", other),
        }
        assert!(!out.exists());
    }

    #[test]
    fn test_execute_all_pairs() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let out = td.path().join("fine");
        let template = ShellTemplate {
            override_pair: None,
        };
        let outcome = run_pairwise_jobs(&genomes(), &out, &template, 3, false, None).unwrap();
        assert_eq!(
            JobBatchOutcome::Executed {
                jobs_run: 4,
                failed: vec![],
                outputs: vec![
                    out.join("a_vs_a.out"),
                    out.join("a_vs_b.out"),
                    out.join("b_vs_a.out"),
                    out.join("b_vs_b.out"),
                ],
            },
            outcome
        );
        let contents = std::fs::read_to_string(out.join("b_vs_a.out")).unwrap();
        assert_eq!("b a\n", contents);
        assert!(out.join("a_vs_a.out").exists());
    }

    #[test]
    fn test_failed_job_is_reported_not_raised() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let out = td.path().join("fine");
        // Stale output from a previous run must not survive a failed job
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("a_vs_b.out"), "stale").unwrap();

        let template = ShellTemplate {
            override_pair: Some((
                "a".to_string(),
                "b".to_string(),
                vec!["sh".to_string(), "-c".to_string(), "echo oops >&2; exit 3".to_string()],
            )),
        };
        let outcome = run_pairwise_jobs(&genomes(), &out, &template, 2, false, None).unwrap();
        let failed = outcome.failed_jobs();
        assert_eq!(1, failed.len());
        assert_eq!("a", failed[0].job.query);
        assert_eq!("b", failed[0].job.reference);
        assert_eq!(
            JobFailureReason::NonZeroExit {
                code: Some(3),
                stderr: "oops".to_string()
            },
            failed[0].reason
        );
        assert!(!outcome.all_failed());
        assert!(!out.join("a_vs_b.out").exists());
        match &outcome {
            JobBatchOutcome::Executed { outputs, .. } => assert_eq!(3, outputs.len()),
            other => panic!("Unexpected outcome {:?}", other),
        }
        assert!(out.join("b_vs_a.out").exists());
    }

    #[test]
    fn test_missing_program_is_failed_job() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let template = ShellTemplate {
            override_pair: Some((
                "b".to_string(),
                "b".to_string(),
                vec!["/nonexistent/aligner".to_string()],
            )),
        };
        let outcome =
            run_pairwise_jobs(&genomes(), td.path(), &template, 1, false, None).unwrap();
        assert!(matches!(
            outcome.failed_jobs()[0].reason,
            JobFailureReason::SpawnFailed(_)
        ));
    }

    #[test]
    fn test_timeout_kills_hung_job() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let template = ShellTemplate {
            override_pair: Some((
                "a".to_string(),
                "a".to_string(),
                vec!["sleep".to_string(), "30".to_string()],
            )),
        };
        let start = Instant::now();
        let outcome = run_pairwise_jobs(
            &genomes(),
            td.path(),
            &template,
            2,
            false,
            Some(Duration::from_millis(300)),
        )
        .unwrap();
        assert!(start.elapsed() < Duration::from_secs(20));
        assert_eq!(
            JobFailureReason::TimedOut(Duration::from_millis(300)),
            outcome.failed_jobs()[0].reason
        );
    }
}
