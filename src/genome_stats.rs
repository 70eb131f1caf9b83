use std::collections::BTreeMap;

use needletail::parse_fastx_file;
use rayon::prelude::*;

use crate::error::CorellaError;
use crate::genome_set::GenomeSet;

/// Total length of each genome, keyed by genome name.
pub type GenomeLengths = BTreeMap<String, u64>;

#[derive(Debug, PartialEq)]
pub struct GenomeAssemblyStats {
    pub num_contigs: usize,
    pub total_length: u64,
}

pub fn calculate_genome_stats(fasta_path: &str) -> Result<GenomeAssemblyStats, CorellaError> {
    let mut num_contigs = 0;
    let mut total_length = 0u64;

    let mut reader = parse_fastx_file(fasta_path).map_err(|e| CorellaError::GenomeRead {
        path: fasta_path.to_string(),
        message: e.to_string(),
    })?;
    while let Some(record) = reader.next() {
        let seq = record.map_err(|e| CorellaError::GenomeRead {
            path: fasta_path.to_string(),
            message: e.to_string(),
        })?;
        num_contigs += 1;
        total_length += seq.seq().len() as u64;
    }

    Ok(GenomeAssemblyStats {
        num_contigs,
        total_length,
    })
}

/// Total lengths of all genomes, read in parallel.
pub fn genome_lengths(genomes: &GenomeSet) -> Result<GenomeLengths, CorellaError> {
    let genome_list: Vec<_> = genomes.iter().collect();
    let lengths: Result<Vec<(String, u64)>, CorellaError> = genome_list
        .par_iter()
        .map(|genome| {
            let stats = calculate_genome_stats(&genome.path.to_string_lossy())?;
            trace!(
                "Genome {} has {} contigs totalling {}bp",
                genome.name,
                stats.num_contigs,
                stats.total_length
            );
            Ok((genome.name.clone(), stats.total_length))
        })
        .collect();
    Ok(lengths?.into_iter().collect())
}
