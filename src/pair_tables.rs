/// One pairwise comparison, as seen by the similarity graph builder.
pub trait PairRecord {
    fn genome1(&self) -> &str;
    fn genome2(&self) -> &str;
    /// Similarity used as the edge weight, higher is more similar.
    fn weight(&self) -> f64;

    fn is_self_pair(&self) -> bool {
        self.genome1() == self.genome2()
    }
}

/// A row of the precluster (MinHash) distance table.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseMetric {
    pub genome1: String,
    pub genome2: String,
    pub distance: f64,
    pub p_value: Option<f64>,
    pub shared_hashes: Option<String>,
    /// 1 - distance
    pub similarity: f64,
}

impl CoarseMetric {
    pub fn from_distance(genome1: &str, genome2: &str, distance: f64) -> CoarseMetric {
        CoarseMetric {
            genome1: genome1.to_string(),
            genome2: genome2.to_string(),
            distance,
            p_value: None,
            shared_hashes: None,
            // Sketch distances between unrelated genomes can exceed 1
            similarity: (1.0 - distance).max(0.0),
        }
    }
}

impl PairRecord for CoarseMetric {
    fn genome1(&self) -> &str {
        &self.genome1
    }
    fn genome2(&self) -> &str {
        &self.genome2
    }
    fn weight(&self) -> f64 {
        self.similarity
    }
}

pub type PairMetricTable = Vec<CoarseMetric>;

/// A row of the alignment table, from one `<query>_vs_<reference>` result.
#[derive(Debug, Clone, PartialEq)]
pub struct PairAlignment {
    pub query: String,
    pub reference: String,
    pub alignment_length: u64,
    pub mismatch_count: u64,
    /// Fraction of aligned bases matching, 0 when nothing aligned.
    pub identity: f64,
    pub query_coverage: f64,
    pub reference_coverage: f64,
    pub coarse_cluster_id: usize,
}

impl PairRecord for PairAlignment {
    fn genome1(&self) -> &str {
        &self.query
    }
    fn genome2(&self) -> &str {
        &self.reference
    }
    fn weight(&self) -> f64 {
        self.identity
    }
}

pub type PairAlignmentTable = Vec<PairAlignment>;
