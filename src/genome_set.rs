use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::delta::PAIR_SEPARATOR;
use crate::error::CorellaError;

/// Name of a genome, the file name up to its first '.', so that
/// `dir/73.20120800_S1X.13.fna` becomes `73`.
pub fn genome_name_from_path(path: &str) -> String {
    let base = Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    match base.split('.').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => base,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Genome {
    pub name: String,
    pub path: PathBuf,
}

/// Genomes to be clustered, in input order. Names are unique.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenomeSet {
    genomes: Vec<Genome>,
    name_to_index: BTreeMap<String, usize>,
}

impl GenomeSet {
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Result<GenomeSet, CorellaError> {
        let mut set = GenomeSet::default();
        for path in paths {
            let path = path.as_ref();
            let name = genome_name_from_path(path);
            // Alignment outputs are named <query>_vs_<reference>
            if name.contains(PAIR_SEPARATOR) {
                return Err(CorellaError::ReservedGenomeName {
                    name,
                    path: path.to_string(),
                });
            }
            if let Some(existing) = set.name_to_index.get(&name) {
                return Err(CorellaError::DuplicateGenome {
                    name,
                    first: set.genomes[*existing].path.to_string_lossy().to_string(),
                    second: path.to_string(),
                });
            }
            set.name_to_index.insert(name.clone(), set.genomes.len());
            set.genomes.push(Genome {
                name,
                path: PathBuf::from(path),
            });
        }
        Ok(set)
    }

    /// The genomes named in `names`, keeping the order of this set.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> Result<GenomeSet, CorellaError> {
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            match self.name_to_index.get(name.as_ref()) {
                Some(i) => indices.push(*i),
                None => {
                    return Err(CorellaError::Reference {
                        genome: name.as_ref().to_string(),
                        context: "genome subset".to_string(),
                    })
                }
            }
        }
        indices.sort_unstable();
        indices.dedup();

        let mut subset = GenomeSet::default();
        for i in indices {
            let genome = &self.genomes[i];
            subset
                .name_to_index
                .insert(genome.name.clone(), subset.genomes.len());
            subset.genomes.push(genome.clone());
        }
        Ok(subset)
    }

    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Genome> {
        self.genomes.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.genomes.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Genome> {
        self.name_to_index.get(name).map(|i| &self.genomes[*i])
    }
}
