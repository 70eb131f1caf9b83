use crate::error::CorellaError;
use crate::genome_set::GenomeSet;
use crate::pair_tables::{CoarseMetric, PairMetricTable};
use crate::PreclusterDistanceFinder;

/// In-process MinHash distances, so no external sketching tool is needed.
pub struct FinchPreclusterer {
    pub num_kmers: usize,
    pub kmer_length: u8,
}

impl PreclusterDistanceFinder for FinchPreclusterer {
    fn distances(&self, genomes: &GenomeSet) -> Result<PairMetricTable, CorellaError> {
        distances(genomes, self.num_kmers, self.kmer_length)
    }

    fn method_name(&self) -> &str {
        "finch"
    }
}

fn finch_error<E: std::fmt::Debug>(e: E) -> CorellaError {
    CorellaError::CoarseTool {
        tool: "finch".to_string(),
        message: format!("{:?}", e),
    }
}

/// Distances between each pair of genomes, each pair reported once.
pub fn distances(
    genomes: &GenomeSet,
    num_kmers: usize,
    kmer_length: u8,
) -> Result<PairMetricTable, CorellaError> {
    // Hash all the files
    let sketch_params = finch::sketch_schemes::SketchParams::Mash {
        kmers_to_sketch: num_kmers,
        final_size: num_kmers,
        no_strict: true, // Possibly not right.
        kmer_length,
        hash_seed: 0,
    };
    let filters = finch::filtering::FilterParams {
        filter_on: Some(false),
        abun_filter: (None, None),
        err_filter: 0.,
        strand_filter: 0.,
    };
    let paths: Vec<String> = genomes
        .iter()
        .map(|g| g.path.to_string_lossy().to_string())
        .collect();
    let path_refs: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
    let names = genomes.names();

    info!("Sketching MinHash representations of each genome with finch ..");
    let sketches =
        finch::sketch_files(&path_refs, &sketch_params, &filters).map_err(finch_error)?;
    info!("Finished sketching genomes");

    let mut to_return = vec![];
    for (i, sketch1) in sketches.iter().enumerate() {
        for (j, sketch2) in sketches[(i + 1)..sketches.len()].iter().enumerate() {
            let genome_index2 = i + j + 1;
            let distance = finch::distance::distance(sketch1, sketch2, false)
                .map_err(finch_error)?
                .mash_distance;
            debug!(
                "Comparing {} and {}, distance {}",
                names[i], names[genome_index2], distance
            );
            to_return.push(CoarseMetric::from_distance(
                names[i],
                names[genome_index2],
                distance,
            ));
        }
    }
    Ok(to_return)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn random_sequence(seed: u64, length: usize) -> String {
        let mut state = seed;
        (0..length)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                b"ACGT"[(state >> 62) as usize] as char
            })
            .collect()
    }

    #[test]
    fn test_identical_and_unrelated_genomes() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let seq = random_sequence(1, 5000);
        let mut paths = vec![];
        for (name, contents) in &[
            ("a", seq.clone()),
            ("b", seq),
            ("c", random_sequence(99, 5000)),
        ] {
            let path = td.path().join(format!("{}.fna", name));
            std::fs::write(&path, format!(">{}\n{}\n", name, contents)).unwrap();
            paths.push(path.to_string_lossy().to_string());
        }
        let genomes = GenomeSet::from_paths(&paths).unwrap();

        let table = distances(&genomes, 1000, 21).unwrap();
        assert_eq!(3, table.len());
        assert_eq!(("a", "b"), (table[0].genome1.as_str(), table[0].genome2.as_str()));
        assert!(table[0].similarity > 0.99);
        assert_eq!(("a", "c"), (table[1].genome1.as_str(), table[1].genome2.as_str()));
        assert!(table[1].similarity < 0.5);
    }
}
