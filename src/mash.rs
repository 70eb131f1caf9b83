use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::CorellaError;
use crate::genome_set::{genome_name_from_path, GenomeSet};
use crate::pair_tables::{CoarseMetric, PairMetricTable};
use crate::PreclusterDistanceFinder;

pub struct MashPreclusterer {
    /// Sketches are written to `<work_directory>/all.msh`
    pub work_directory: PathBuf,
    pub kmer_length: u8,
    pub sketch_size: usize,
    pub threads: u16,
}

impl MashPreclusterer {
    fn sketch_prefix(&self) -> PathBuf {
        self.work_directory.join("all")
    }

    fn sketch_file(&self) -> PathBuf {
        self.work_directory.join("all.msh")
    }

    fn sketch_args(&self) -> Vec<String> {
        vec![
            "sketch".to_string(),
            "-o".to_string(),
            self.sketch_prefix().to_string_lossy().to_string(),
            "-p".to_string(),
            self.threads.to_string(),
            "-k".to_string(),
            self.kmer_length.to_string(),
            "-s".to_string(),
            self.sketch_size.to_string(),
        ]
    }

    fn dist_args(&self) -> Vec<String> {
        let sketch = self.sketch_file().to_string_lossy().to_string();
        vec![
            "dist".to_string(),
            "-p".to_string(),
            self.threads.to_string(),
            sketch.clone(),
            sketch,
        ]
    }
}

impl PreclusterDistanceFinder for MashPreclusterer {
    fn distances(&self, genomes: &GenomeSet) -> Result<PairMetricTable, CorellaError> {
        std::fs::create_dir_all(&self.work_directory)
            .map_err(|e| CorellaError::io(&self.work_directory, e))?;

        // List the genome paths in a file rather than on the command line, so
        // large genome sets do not overflow the argument limit.
        let mut tf = tempfile::Builder::new()
            .prefix("corella-input-genomes")
            .suffix(".txt")
            .tempfile()
            .map_err(|e| CorellaError::io(std::env::temp_dir(), e))?;
        for genome in genomes.iter() {
            writeln!(tf, "{}", genome.path.display()).map_err(|e| CorellaError::io(tf.path(), e))?;
        }
        tf.flush().map_err(|e| CorellaError::io(tf.path(), e))?;

        info!("Sketching {} genomes with mash ..", genomes.len());
        let mut cmd = Command::new("mash");
        cmd.args(self.sketch_args())
            .arg("-l")
            .arg(tf.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("Running mash command: {:?}", &cmd);
        let output = cmd.output().map_err(|e| CorellaError::CoarseTool {
            tool: "mash sketch".to_string(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(CorellaError::CoarseTool {
                tool: "mash sketch".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Calculating mash distances ..");
        let mut cmd = Command::new("mash");
        cmd.args(self.dist_args());
        let table = run_distance_command(cmd)?;
        info!("Finished calculating {} mash distances", table.len());
        Ok(table)
    }

    fn method_name(&self) -> &str {
        "mash"
    }

    fn dry_run_commands(&self, genomes: &GenomeSet) -> Vec<String> {
        let mut sketch = vec!["mash".to_string()];
        sketch.extend(self.sketch_args());
        sketch.extend(genomes.iter().map(|g| g.path.to_string_lossy().to_string()));
        let mut dist = vec!["mash".to_string()];
        dist.extend(self.dist_args());
        vec![sketch.join(" "), dist.join(" ")]
    }
}

/// Run a `mash dist` style command, parsing its stdout as it is written.
/// stderr is drained on its own thread so a noisy process cannot fill the
/// pipe and stall.
fn run_distance_command(mut cmd: Command) -> Result<PairMetricTable, CorellaError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    debug!("Running mash command: {:?}", &cmd);
    let mut process = cmd.spawn().map_err(|e| CorellaError::CoarseTool {
        tool: "mash dist".to_string(),
        message: e.to_string(),
    })?;
    let stderr_reader = process.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        })
    });

    let table = match process.stdout.take() {
        Some(stdout) => parse_mash_table(BufReader::new(stdout)),
        None => Ok(vec![]),
    };
    if table.is_err() {
        let _ = process.kill();
    }
    let status = process.wait().map_err(|e| CorellaError::CoarseTool {
        tool: "mash dist".to_string(),
        message: e.to_string(),
    })?;
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    if !status.success() {
        return Err(CorellaError::CoarseTool {
            tool: "mash dist".to_string(),
            message: stderr.trim().to_string(),
        });
    }
    table
}

/// Parse `mash dist` output: reference, query, distance, p-value and shared
/// hashes, tab separated without a header.
pub fn parse_mash_table<R: Read>(reader: R) -> Result<PairMetricTable, CorellaError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(reader);

    let mut table = vec![];
    for record_res in rdr.records() {
        let record = record_res.map_err(|e| CorellaError::Csv {
            context: "mash dist output".to_string(),
            source: e,
        })?;
        if record.len() != 5 {
            return Err(CorellaError::CoarseTool {
                tool: "mash dist".to_string(),
                message: format!("expected 5 fields, found {:?}", record),
            });
        }
        let parse_float = |field: &str, what: &str| -> Result<f64, CorellaError> {
            field.parse().map_err(|_| CorellaError::CoarseTool {
                tool: "mash dist".to_string(),
                message: format!("failed to parse {} from '{}'", what, field),
            })
        };
        let distance = parse_float(&record[2], "distance")?;
        let p_value = parse_float(&record[3], "p-value")?;

        let mut metric = CoarseMetric::from_distance(
            &genome_name_from_path(&record[0]),
            &genome_name_from_path(&record[1]),
            distance,
        );
        metric.p_value = Some(p_value);
        metric.shared_hashes = Some(record[4].to_string());
        trace!("Found mash record {:?}", metric);
        table.push(metric);
    }
    Ok(table)
}
