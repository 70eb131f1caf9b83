use std::io::Write;
use std::path::Path;

use crate::clusterer::HierarchicalClusterAssignment;
use crate::error::CorellaError;
use crate::genome_set::GenomeSet;
use crate::pair_tables::{PairAlignmentTable, PairMetricTable};

fn csv_error(context: &str) -> impl Fn(csv::Error) -> CorellaError + '_ {
    move |e| CorellaError::Csv {
        context: context.to_string(),
        source: e,
    }
}

fn open_output(path: &Path) -> Result<std::fs::File, CorellaError> {
    std::fs::File::create(path).map_err(|e| CorellaError::io(path, e))
}

/// One line per genome: name, path and cluster label, tab separated.
pub fn write_cluster_definition<W: Write>(
    writer: W,
    genomes: &GenomeSet,
    assignment: &HierarchicalClusterAssignment,
) -> Result<(), CorellaError> {
    let on_error = csv_error("cluster definition");
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);
    for (genome, label) in assignment.iter() {
        let path = genomes
            .get(genome)
            .map(|g| g.path.to_string_lossy().to_string())
            .ok_or_else(|| CorellaError::Reference {
                genome: genome.to_string(),
                context: "cluster definition output".to_string(),
            })?;
        wtr.write_record([genome, path.as_str(), label])
            .map_err(&on_error)?;
    }
    wtr.flush()
        .map_err(|e| CorellaError::io("cluster definition", e))?;
    Ok(())
}

pub fn write_precluster_table<W: Write>(
    writer: W,
    table: &PairMetricTable,
) -> Result<(), CorellaError> {
    let on_error = csv_error("precluster table");
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "genome1",
        "genome2",
        "distance",
        "p_value",
        "shared_hashes",
        "similarity",
    ])
    .map_err(&on_error)?;
    for row in table {
        wtr.write_record(&[
            row.genome1.clone(),
            row.genome2.clone(),
            row.distance.to_string(),
            row.p_value.map(|p| p.to_string()).unwrap_or_default(),
            row.shared_hashes.clone().unwrap_or_default(),
            row.similarity.to_string(),
        ])
        .map_err(&on_error)?;
    }
    wtr.flush().map_err(|e| CorellaError::io("precluster table", e))?;
    Ok(())
}

pub fn write_alignment_table<W: Write>(
    writer: W,
    table: &PairAlignmentTable,
) -> Result<(), CorellaError> {
    let on_error = csv_error("alignment table");
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "query",
        "reference",
        "alignment_length",
        "mismatch_count",
        "identity",
        "query_coverage",
        "reference_coverage",
        "coarse_cluster",
    ])
    .map_err(&on_error)?;
    for row in table {
        wtr.write_record(&[
            row.query.clone(),
            row.reference.clone(),
            row.alignment_length.to_string(),
            row.mismatch_count.to_string(),
            row.identity.to_string(),
            row.query_coverage.to_string(),
            row.reference_coverage.to_string(),
            row.coarse_cluster_id.to_string(),
        ])
        .map_err(&on_error)?;
    }
    wtr.flush().map_err(|e| CorellaError::io("alignment table", e))?;
    Ok(())
}

pub fn write_cluster_definition_file(
    path: &Path,
    genomes: &GenomeSet,
    assignment: &HierarchicalClusterAssignment,
) -> Result<(), CorellaError> {
    info!("Writing cluster definition to {}", path.display());
    write_cluster_definition(open_output(path)?, genomes, assignment)
}

pub fn write_precluster_table_file(
    path: &Path,
    table: &PairMetricTable,
) -> Result<(), CorellaError> {
    info!("Writing precluster distances to {}", path.display());
    write_precluster_table(open_output(path)?, table)
}

pub fn write_alignment_table_file(
    path: &Path,
    table: &PairAlignmentTable,
) -> Result<(), CorellaError> {
    info!("Writing alignment statistics to {}", path.display());
    write_alignment_table(open_output(path)?, table)
}
