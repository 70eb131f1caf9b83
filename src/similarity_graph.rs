use std::collections::BTreeMap;

use disjoint::DisjointSet;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use crate::error::CorellaError;
use crate::pair_tables::{CoarseMetric, PairAlignment, PairRecord};

/// Decides whether a pairwise record is similar enough to join two genomes.
pub trait ThresholdPolicy<R> {
    fn accepts(&self, record: &R) -> bool;
}

/// Accept precluster rows with similarity strictly above the threshold.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityThreshold {
    pub min_similarity: f64,
}

impl ThresholdPolicy<CoarseMetric> for SimilarityThreshold {
    fn accepts(&self, record: &CoarseMetric) -> bool {
        record.similarity > self.min_similarity
    }
}

/// Accept alignments with both identity and reference coverage strictly
/// above their thresholds.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentThreshold {
    pub min_identity: f64,
    pub min_reference_coverage: f64,
}

impl ThresholdPolicy<PairAlignment> for AlignmentThreshold {
    fn accepts(&self, record: &PairAlignment) -> bool {
        record.identity > self.min_identity
            && record.reference_coverage > self.min_reference_coverage
    }
}

/// Undirected graph with one node per genome. Node order is the order the
/// genomes were given in.
#[derive(Debug, Clone)]
pub struct SimilarityGraph {
    graph: UnGraph<String, f64>,
    name_to_node: BTreeMap<String, NodeIndex>,
}

impl SimilarityGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    pub fn edge_weight(&self, genome1: &str, genome2: &str) -> Option<f64> {
        let a = self.name_to_node.get(genome1)?;
        let b = self.name_to_node.get(genome2)?;
        self.graph
            .find_edge(*a, *b)
            .and_then(|e| self.graph.edge_weight(e))
            .copied()
    }
}

/// Build a graph over all_nodes, with an edge for each non-self record
/// accepted by the threshold policy. Every record must name genomes from
/// all_nodes.
pub fn build_graph<R, P, S>(
    table: &[R],
    policy: &P,
    all_nodes: &[S],
) -> Result<SimilarityGraph, CorellaError>
where
    R: PairRecord,
    P: ThresholdPolicy<R> + ?Sized,
    S: AsRef<str>,
{
    let mut graph = UnGraph::<String, f64>::with_capacity(all_nodes.len(), table.len());
    let mut name_to_node = BTreeMap::new();
    for name in all_nodes {
        let name = name.as_ref();
        if !name_to_node.contains_key(name) {
            let node = graph.add_node(name.to_string());
            name_to_node.insert(name.to_string(), node);
        }
    }

    let lookup = |genome: &str| -> Result<NodeIndex, CorellaError> {
        name_to_node
            .get(genome)
            .copied()
            .ok_or_else(|| CorellaError::Reference {
                genome: genome.to_string(),
                context: "pairwise table row".to_string(),
            })
    };

    for record in table {
        let a = lookup(record.genome1())?;
        let b = lookup(record.genome2())?;
        if record.is_self_pair() || !policy.accepts(record) {
            continue;
        }
        trace!(
            "Adding edge {} - {} with weight {}",
            record.genome1(),
            record.genome2(),
            record.weight()
        );
        graph.update_edge(a, b, record.weight());
    }
    debug!(
        "Built similarity graph with {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    Ok(SimilarityGraph {
        graph,
        name_to_node,
    })
}

/// Cluster id of each genome, ids dense from 0.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterAssignment {
    assignments: Vec<(String, usize)>,
    name_to_position: BTreeMap<String, usize>,
    num_clusters: usize,
}

impl ClusterAssignment {
    /// All genomes in one cluster with id 0.
    pub fn single_cluster<S: AsRef<str>>(genomes: &[S]) -> ClusterAssignment {
        let mut to_return = ClusterAssignment::default();
        for genome in genomes {
            to_return.push(genome.as_ref(), 0);
        }
        to_return
    }

    /// Each genome in its own cluster, ids in the order given.
    pub fn singletons<S: AsRef<str>>(genomes: &[S]) -> ClusterAssignment {
        let mut to_return = ClusterAssignment::default();
        for (i, genome) in genomes.iter().enumerate() {
            to_return.push(genome.as_ref(), i);
        }
        to_return
    }

    fn push(&mut self, genome: &str, cluster_id: usize) {
        self.name_to_position
            .insert(genome.to_string(), self.assignments.len());
        self.assignments.push((genome.to_string(), cluster_id));
        self.num_clusters = self.num_clusters.max(cluster_id + 1);
    }

    pub fn get(&self, genome: &str) -> Option<usize> {
        self.name_to_position
            .get(genome)
            .map(|i| self.assignments[*i].1)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.assignments.iter().map(|(g, c)| (g.as_str(), *c))
    }

    /// Members of each cluster, indexed by cluster id, in node order.
    pub fn clusters(&self) -> Vec<Vec<&str>> {
        let mut to_return = vec![vec![]; self.num_clusters];
        for (genome, cluster_id) in &self.assignments {
            to_return[*cluster_id].push(genome.as_str());
        }
        to_return
    }
}

/// Assign each node to its connected component. Components are numbered in
/// the order their first node appears in the graph.
pub fn cluster_graph(graph: &SimilarityGraph) -> ClusterAssignment {
    let mut components = DisjointSet::with_len(graph.node_count());
    for edge in graph.graph.edge_references() {
        components.join(edge.source().index(), edge.target().index());
    }

    let mut root_to_cluster: BTreeMap<usize, usize> = BTreeMap::new();
    let mut to_return = ClusterAssignment::default();
    for node in graph.graph.node_indices() {
        let root = components.root_of(node.index());
        let next_id = root_to_cluster.len();
        let cluster_id = *root_to_cluster.entry(root).or_insert(next_id);
        to_return.push(&graph.graph[node], cluster_id);
    }
    debug!(
        "Found {} clusters amongst {} genomes",
        to_return.num_clusters(),
        to_return.len()
    );
    to_return
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn coarse(g1: &str, g2: &str, similarity: f64) -> CoarseMetric {
        CoarseMetric::from_distance(g1, g2, 1.0 - similarity)
    }

    fn alignment(q: &str, r: &str, identity: f64, reference_coverage: f64) -> PairAlignment {
        PairAlignment {
            query: q.to_string(),
            reference: r.to_string(),
            alignment_length: 1000,
            mismatch_count: 0,
            identity,
            query_coverage: reference_coverage,
            reference_coverage,
            coarse_cluster_id: 0,
        }
    }

    fn threshold(t: f64) -> SimilarityThreshold {
        SimilarityThreshold { min_similarity: t }
    }

    #[test]
    fn test_isolated_genomes_are_nodes() {
        init();
        let table = vec![coarse("a", "b", 0.95)];
        let graph = build_graph(&table, &threshold(0.9), &["a", "b", "c", "d"]).unwrap();
        assert_eq!(4, graph.node_count());
        assert_eq!(1, graph.edge_count());
        assert_eq!(vec!["a", "b", "c", "d"], graph.node_names());

        let clusters = cluster_graph(&graph);
        assert_eq!(vec![vec!["a", "b"], vec!["c"], vec!["d"]], clusters.clusters());
        assert_eq!(Some(1), clusters.get("c"));
        assert_eq!(Some(2), clusters.get("d"));
    }

    #[test]
    fn test_unknown_genome_is_reference_error() {
        init();
        let table = vec![coarse("a", "z", 0.1)];
        match build_graph(&table, &threshold(0.9), &["a", "b"]) {
            Err(CorellaError::Reference { genome, .. }) => assert_eq!("z", genome),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        init();
        let table = vec![coarse("a", "b", 0.5)];
        let graph = build_graph(&table, &threshold(0.5), &["a", "b"]).unwrap();
        assert_eq!(0, graph.edge_count());
    }

    #[test]
    fn test_both_directions_make_one_edge() {
        init();
        let table = vec![coarse("a", "b", 0.95), coarse("b", "a", 0.96)];
        let graph = build_graph(&table, &threshold(0.9), &["a", "b"]).unwrap();
        assert_eq!(1, graph.edge_count());
        assert_eq!(Some(0.96), graph.edge_weight("a", "b").map(|w| (w * 100.).round() / 100.));
    }

    #[test]
    fn test_self_pairs_do_not_change_clustering() {
        init();
        let nodes = ["a", "b", "c"];
        let without_self = vec![coarse("a", "c", 0.99), coarse("b", "c", 0.2)];
        let mut with_self = without_self.clone();
        for n in nodes.iter() {
            with_self.push(coarse(n, n, 1.0));
        }
        let g1 = build_graph(&without_self, &threshold(0.9), &nodes).unwrap();
        let g2 = build_graph(&with_self, &threshold(0.9), &nodes).unwrap();
        assert_eq!(g1.edge_count(), g2.edge_count());
        assert_eq!(cluster_graph(&g1), cluster_graph(&g2));
    }

    #[test]
    fn test_raising_threshold_never_merges() {
        init();
        let nodes = ["a", "b", "c", "d", "e"];
        let table = vec![
            coarse("a", "b", 0.99),
            coarse("b", "c", 0.95),
            coarse("c", "d", 0.92),
            coarse("d", "e", 0.85),
            coarse("a", "e", 0.97),
        ];
        let mut last = 0;
        for t in &[0.80, 0.86, 0.93, 0.96, 0.98, 0.995] {
            let graph = build_graph(&table, &threshold(*t), &nodes).unwrap();
            let n = cluster_graph(&graph).num_clusters();
            assert!(n >= last, "threshold {} gave {} clusters, fewer than {}", t, n, last);
            last = n;
        }
        assert_eq!(5, last);
    }

    #[test]
    fn test_raising_alignment_thresholds_never_merges() {
        init();
        let nodes = ["a", "b", "c", "d", "e"];
        let table = vec![
            alignment("a", "b", 0.999, 0.95),
            alignment("b", "c", 0.995, 0.60),
            alignment("c", "d", 0.991, 0.80),
            alignment("d", "e", 0.97, 0.99),
            alignment("e", "a", 0.998, 0.40),
        ];
        let identities = [0.95, 0.99, 0.993, 0.996, 0.9995];
        let coverages = [0.3, 0.5, 0.7, 0.9, 0.99];
        let num_clusters = |min_identity: f64, min_reference_coverage: f64| {
            let policy = AlignmentThreshold {
                min_identity,
                min_reference_coverage,
            };
            cluster_graph(&build_graph(&table, &policy, &nodes).unwrap()).num_clusters()
        };
        for (i, identity) in identities.iter().enumerate() {
            for (j, coverage) in coverages.iter().enumerate() {
                let n = num_clusters(*identity, *coverage);
                // Raising either threshold alone can only split clusters
                if i + 1 < identities.len() {
                    assert!(num_clusters(identities[i + 1], *coverage) >= n);
                }
                if j + 1 < coverages.len() {
                    assert!(num_clusters(*identity, coverages[j + 1]) >= n);
                }
            }
        }
        assert_eq!(1, num_clusters(0.95, 0.3));
        assert_eq!(5, num_clusters(0.9995, 0.99));
    }

    #[test]
    fn test_component_ids_follow_node_order() {
        init();
        // Edges are seen in reverse but ids follow node insertion order
        let table = vec![coarse("d", "c", 0.99), coarse("b", "a", 0.99)];
        let graph = build_graph(&table, &threshold(0.9), &["a", "b", "c", "d"]).unwrap();
        let clusters = cluster_graph(&graph);
        assert_eq!(
            vec![("a", 0), ("b", 0), ("c", 1), ("d", 1)],
            clusters.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_transitive_linkage() {
        init();
        let table = vec![coarse("a", "b", 0.95), coarse("b", "c", 0.95)];
        let graph = build_graph(&table, &threshold(0.9), &["a", "c", "b"]).unwrap();
        assert_eq!(1, cluster_graph(&graph).num_clusters());
    }

    #[test]
    fn test_alignment_threshold_needs_identity_and_coverage() {
        init();
        let nodes = ["a", "b", "c", "d"];
        let table = vec![
            alignment("a", "b", 0.995, 0.9),
            alignment("a", "c", 0.995, 0.4),
            alignment("a", "d", 0.97, 0.9),
        ];
        let policy = AlignmentThreshold {
            min_identity: 0.99,
            min_reference_coverage: 0.5,
        };
        let graph = build_graph(&table, &policy, &nodes).unwrap();
        assert_eq!(1, graph.edge_count());
        assert_eq!(Some(0.995), graph.edge_weight("b", "a"));
        assert_eq!(3, cluster_graph(&graph).num_clusters());
    }

    #[test]
    fn test_empty_graph() {
        init();
        let table: Vec<CoarseMetric> = vec![];
        let nodes: Vec<&str> = vec![];
        let graph = build_graph(&table, &threshold(0.9), &nodes).unwrap();
        let clusters = cluster_graph(&graph);
        assert!(clusters.is_empty());
        assert_eq!(0, clusters.num_clusters());
    }
}
