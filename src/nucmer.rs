use std::fmt;
use std::str::FromStr;

use crate::delta::DELTA_EXTENSION;
use crate::job_runner::{AlignmentCommandTemplate, AlignmentJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NucmerMethod {
    Mum,
    MumReference,
    MaxMatch,
}

impl fmt::Display for NucmerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NucmerMethod::Mum => "mum",
            NucmerMethod::MumReference => "mumreference",
            NucmerMethod::MaxMatch => "maxmatch",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for NucmerMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mum" => Ok(NucmerMethod::Mum),
            "mumreference" => Ok(NucmerMethod::MumReference),
            "maxmatch" => Ok(NucmerMethod::MaxMatch),
            _ => Err(format!("Unknown nucmer method '{}'", s)),
        }
    }
}

/// nucmer invocation settings, one `.delta` file per pair.
#[derive(Debug, Clone, PartialEq)]
pub struct NucmerCommand {
    /// Minimum length of a cluster of matches (-c)
    pub min_cluster: u32,
    /// Maximum gap between adjacent matches in a cluster (-g)
    pub max_gap: u32,
    pub no_extend: bool,
    pub method: NucmerMethod,
}

impl Default for NucmerCommand {
    fn default() -> NucmerCommand {
        NucmerCommand {
            min_cluster: 65,
            max_gap: 90,
            no_extend: false,
            method: NucmerMethod::Mum,
        }
    }
}

impl AlignmentCommandTemplate for NucmerCommand {
    fn program_name(&self) -> &str {
        "nucmer"
    }

    fn output_extension(&self) -> &str {
        DELTA_EXTENSION
    }

    fn command_line(&self, job: &AlignmentJob) -> Vec<String> {
        let mut argv = vec![
            "nucmer".to_string(),
            format!("--{}", self.method),
            "-p".to_string(),
            job.output_prefix.to_string_lossy().to_string(),
            "-c".to_string(),
            self.min_cluster.to_string(),
            "-g".to_string(),
            self.max_gap.to_string(),
        ];
        if self.no_extend {
            argv.push("--noextend".to_string());
        }
        argv.push(job.reference_path.to_string_lossy().to_string());
        argv.push(job.query_path.to_string_lossy().to_string());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_set::GenomeSet;
    use crate::job_runner::generate_jobs;
    use std::path::Path;

    #[test]
    fn test_command_line() {
        let genomes = GenomeSet::from_paths(&["/g/q.fna", "/g/r.fna"]).unwrap();
        let jobs = generate_jobs(&genomes, Path::new("/work/fine/0"));
        let nucmer = NucmerCommand {
            max_gap: 1,
            no_extend: true,
            ..Default::default()
        };
        assert_eq!(
            "nucmer --mum -p /work/fine/0/q_vs_r -c 65 -g 1 --noextend /g/r.fna /g/q.fna",
            nucmer.command_line(&jobs[1]).join(" ")
        );

        let maxmatch = NucmerCommand {
            method: NucmerMethod::MaxMatch,
            ..Default::default()
        };
        assert_eq!(
            "nucmer --maxmatch -p /work/fine/0/r_vs_q -c 65 -g 90 /g/q.fna /g/r.fna",
            maxmatch.command_line(&jobs[2]).join(" ")
        );
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(Ok(NucmerMethod::MumReference), "mumreference".parse());
        assert!("needle".parse::<NucmerMethod>().is_err());
    }
}
