//! Parsing of nucmer `.delta` alignment files into per-pair identity and
//! coverage.
//!
//! A delta file looks like
//! ```text
//! /path/to/reference.fna /path/to/query.fna
//! NUCMER
//! >ref_contig query_contig 5000 4900
//! 1 1801 1 1801 9 9 0
//! 0
//! ```
//! The first line names the two inputs and the second the program. Each `>`
//! line opens a pair of sequences, followed by 7-column alignment records
//! (start, end, query start, query end, errors, similarity errors, stop
//! codons) each followed by indel offsets, one per line, terminated by 0.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::CorellaError;
use crate::genome_stats::GenomeLengths;
use crate::pair_tables::{PairAlignment, PairAlignmentTable};

pub const DELTA_EXTENSION: &str = "delta";
pub const PAIR_SEPARATOR: &str = "_vs_";

/// Totals over all alignment records in one delta file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeltaTotals {
    pub aligned_length: u64,
    pub mismatches: u64,
}

/// Alignments parsed from a batch of result files.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedAlignments {
    pub table: PairAlignmentTable,
    /// (query, reference) of pairs where nothing aligned, so their identity
    /// was set to 0.
    pub degenerate_pairs: Vec<(String, String)>,
}

impl ParsedAlignments {
    pub fn had_degenerate_pair(&self) -> bool {
        !self.degenerate_pairs.is_empty()
    }
}

fn parse_field(
    field: &str,
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<u64, CorellaError> {
    field
        .parse::<i64>()
        .map(|v| v.unsigned_abs())
        .map_err(|_| CorellaError::MalformedRecord {
            path: path.to_path_buf(),
            line_number,
            line: line.to_string(),
        })
}

/// Sum aligned length and mismatches over every alignment record of a delta
/// file read from `reader`. `path` is only used in error messages.
pub fn parse_delta<R: BufRead>(reader: R, path: &Path) -> Result<DeltaTotals, CorellaError> {
    let mut totals = DeltaTotals::default();
    for (i, line_res) in reader.lines().enumerate() {
        let line_number = i + 1;
        let line = line_res.map_err(|e| CorellaError::io(path, e))?;
        let fields: Vec<&str> = line.split_whitespace().collect();

        // Input file paths, then program name
        if line_number <= 2 || fields.is_empty() {
            continue;
        }
        if fields[0] == "NUCMER" || fields[0] == "PROMER" || fields[0].starts_with('>') {
            continue;
        }
        match fields.len() {
            7 => {
                let start: i64 = parse_field(fields[0], path, line_number, &line)? as i64;
                let end: i64 = parse_field(fields[1], path, line_number, &line)? as i64;
                for field in &fields[2..] {
                    parse_field(field, path, line_number, &line)?;
                }
                let errors = parse_field(fields[4], path, line_number, &line)?;
                trace!("Alignment record {}..{} with {} errors", start, end, errors);
                totals.aligned_length += (end - start).unsigned_abs();
                totals.mismatches += errors;
            }
            // Indel offset
            1 => {
                parse_field(fields[0], path, line_number, &line)?;
            }
            _ => {
                return Err(CorellaError::MalformedRecord {
                    path: path.to_path_buf(),
                    line_number,
                    line,
                })
            }
        }
    }
    Ok(totals)
}

pub fn parse_delta_file(path: &Path) -> Result<DeltaTotals, CorellaError> {
    let file = File::open(path).map_err(|e| CorellaError::io(path, e))?;
    parse_delta(BufReader::new(file), path)
}

/// Split `<query>_vs_<reference>` into its genome names. Genome names may
/// themselves contain the separator, so the first split where both halves
/// are known genomes is used.
fn split_pair_name(
    path: &Path,
    genome_lengths: &GenomeLengths,
) -> Result<(String, String), CorellaError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| CorellaError::MalformedFileName {
            path: path.to_path_buf(),
        })?;

    let mut first_split = None;
    for (i, _) in stem.match_indices(PAIR_SEPARATOR) {
        let query = &stem[..i];
        let reference = &stem[i + PAIR_SEPARATOR.len()..];
        if genome_lengths.contains_key(query) && genome_lengths.contains_key(reference) {
            return Ok((query.to_string(), reference.to_string()));
        }
        if first_split.is_none() {
            first_split = Some((query.to_string(), reference.to_string()));
        }
    }

    match first_split {
        None => Err(CorellaError::MalformedFileName {
            path: path.to_path_buf(),
        }),
        Some((query, reference)) => {
            let genome = if genome_lengths.contains_key(&query) {
                reference
            } else {
                query
            };
            Err(CorellaError::Reference {
                genome,
                context: format!("alignment output {}", path.display()),
            })
        }
    }
}

fn fraction(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Parse each `<query>_vs_<reference>` result file into a row of identity and
/// coverage, tagging rows with the precluster they were computed within.
///
/// A pair with nothing aligned gets identity 0 and is listed in
/// `degenerate_pairs` rather than failing the batch.
pub fn parse_alignment_outputs<P: AsRef<Path>>(
    result_files: &[P],
    genome_lengths: &GenomeLengths,
    coarse_cluster_id: usize,
) -> Result<ParsedAlignments, CorellaError> {
    let mut parsed = ParsedAlignments::default();
    for result_file in result_files {
        let path = result_file.as_ref();
        let (query, reference) = split_pair_name(path, genome_lengths)?;
        let totals = parse_delta_file(path)?;

        let identity = if totals.aligned_length == 0 {
            warn!(
                "Total alignment length reported in {} is zero, setting identity between {} and {} to 0",
                path.display(),
                query,
                reference
            );
            parsed
                .degenerate_pairs
                .push((query.clone(), reference.clone()));
            0.0
        } else {
            1.0 - totals.mismatches as f64 / totals.aligned_length as f64
        };
        let query_coverage = fraction(totals.aligned_length, genome_lengths[&query]);
        let reference_coverage = fraction(totals.aligned_length, genome_lengths[&reference]);
        debug!(
            "{} vs {}: aligned {}, mismatches {}, identity {}, coverage {}/{}",
            query,
            reference,
            totals.aligned_length,
            totals.mismatches,
            identity,
            query_coverage,
            reference_coverage
        );

        parsed.table.push(PairAlignment {
            query,
            reference,
            alignment_length: totals.aligned_length,
            mismatch_count: totals.mismatches,
            identity,
            query_coverage,
            reference_coverage,
            coarse_cluster_id,
        });
    }
    Ok(parsed)
}

/// Result files in `dir` with the given extension, sorted by name. A missing
/// directory has no result files.
pub fn find_result_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, CorellaError> {
    if !dir.exists() {
        debug!("No result directory {}", dir.display());
        return Ok(vec![]);
    }
    let mut files = vec![];
    for entry in std::fs::read_dir(dir).map_err(|e| CorellaError::io(dir, e))? {
        let path = entry.map_err(|e| CorellaError::io(dir, e))?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every result file with the given extension in `dir`.
pub fn parse_alignment_directory(
    dir: &Path,
    extension: &str,
    genome_lengths: &GenomeLengths,
    coarse_cluster_id: usize,
) -> Result<ParsedAlignments, CorellaError> {
    let files = find_result_files(dir, extension)?;
    debug!("Found {} result files in {}", files.len(), dir.display());
    parse_alignment_outputs(&files, genome_lengths, coarse_cluster_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    const GOOD_DELTA: &str = "/data/A.fna /data/B.fna
NUCMER
>a1 b1 2000 2000
1 1001 1 1001 5 5 0
0
>a2 b2 2000 2000
1200 2000 1200 2000 4 4 0
12
-3
0
";

    fn lengths(entries: &[(&str, u64)]) -> GenomeLengths {
        entries.iter().map(|(g, l)| (g.to_string(), *l)).collect()
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_parse_delta_totals() {
        init();
        let totals = parse_delta(GOOD_DELTA.as_bytes(), Path::new("x.delta")).unwrap();
        assert_eq!(
            DeltaTotals {
                aligned_length: 1800,
                mismatches: 9
            },
            totals
        );
    }

    #[test]
    fn test_reverse_strand_record_uses_absolute_length() {
        init();
        let delta = "a b\nNUCMER\n>x y 100 100\n90 10 10 90 2 2 0\n0\n";
        let totals = parse_delta(delta.as_bytes(), Path::new("x.delta")).unwrap();
        assert_eq!(80, totals.aligned_length);
        assert_eq!(2, totals.mismatches);
    }

    #[test]
    fn test_malformed_record() {
        init();
        let delta = "a b\nNUCMER\n>x y 100 100\n1 50 1 50 2 2\n0\n";
        match parse_delta(delta.as_bytes(), Path::new("x.delta")) {
            Err(CorellaError::MalformedRecord { line_number, .. }) => assert_eq!(4, line_number),
            other => panic!("Unexpected result {:?}", other),
        }

        let delta = "a b\nNUCMER\n>x y 100 100\n1 50 1 50 two 2 0\n0\n";
        assert!(matches!(
            parse_delta(delta.as_bytes(), Path::new("x.delta")),
            Err(CorellaError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_headers_and_blank_lines_tolerated() {
        init();
        let delta = "a b\nNUCMER\n\n>x y 100 100\n\n0\n";
        let totals = parse_delta(delta.as_bytes(), Path::new("x.delta")).unwrap();
        assert_eq!(DeltaTotals::default(), totals);
    }

    #[test]
    fn test_identity_and_coverage() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let path = write(td.path(), "A_vs_B.delta", GOOD_DELTA);
        let parsed =
            parse_alignment_outputs(&[path], &lengths(&[("A", 2000), ("B", 4000)]), 3).unwrap();

        assert!(!parsed.had_degenerate_pair());
        assert_eq!(1, parsed.table.len());
        let row = &parsed.table[0];
        assert_eq!("A", row.query);
        assert_eq!("B", row.reference);
        assert_eq!(1800, row.alignment_length);
        assert_eq!(9, row.mismatch_count);
        assert!((row.identity - 0.995).abs() < 1e-9);
        assert!((row.query_coverage - 0.9).abs() < 1e-9);
        assert!((row.reference_coverage - 0.45).abs() < 1e-9);
        assert_eq!(3, row.coarse_cluster_id);
    }

    #[test]
    fn test_zero_alignment_is_degenerate_not_error() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let path = write(td.path(), "A_vs_B.delta", "a b\nNUCMER\n");
        let parsed =
            parse_alignment_outputs(&[path], &lengths(&[("A", 2000), ("B", 2000)]), 0).unwrap();

        assert_eq!(0.0, parsed.table[0].identity);
        assert_eq!(0.0, parsed.table[0].reference_coverage);
        assert!(parsed.had_degenerate_pair());
        assert_eq!(
            vec![("A".to_string(), "B".to_string())],
            parsed.degenerate_pairs
        );
    }

    #[test]
    fn test_genome_names_containing_separator() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let path = write(td.path(), "x_vs_y_vs_z.delta", GOOD_DELTA);
        let parsed = parse_alignment_outputs(
            &[path],
            &lengths(&[("x_vs_y", 2000), ("z", 2000)]),
            0,
        )
        .unwrap();
        assert_eq!("x_vs_y", parsed.table[0].query);
        assert_eq!("z", parsed.table[0].reference);
    }

    #[test]
    fn test_unknown_genome_in_file_name() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let path = write(td.path(), "A_vs_Q.delta", GOOD_DELTA);
        match parse_alignment_outputs(&[path], &lengths(&[("A", 10)]), 0) {
            Err(CorellaError::Reference { genome, .. }) => assert_eq!("Q", genome),
            other => panic!("Unexpected result {:?}", other),
        }

        let path = write(td.path(), "AQ.delta", GOOD_DELTA);
        assert!(matches!(
            parse_alignment_outputs(&[path], &lengths(&[("A", 10)]), 0),
            Err(CorellaError::MalformedFileName { .. })
        ));
    }

    #[test]
    fn test_parse_alignment_directory() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        write(td.path(), "B_vs_A.delta", GOOD_DELTA);
        write(td.path(), "A_vs_B.delta", GOOD_DELTA);
        write(td.path(), "A_vs_B.log", "not a delta file");
        std::fs::create_dir(td.path().join("sub.delta")).unwrap();

        let files = find_result_files(td.path(), DELTA_EXTENSION).unwrap();
        assert_eq!(
            vec![td.path().join("A_vs_B.delta"), td.path().join("B_vs_A.delta")],
            files
        );

        let parsed = parse_alignment_directory(
            td.path(),
            DELTA_EXTENSION,
            &lengths(&[("A", 2000), ("B", 2000)]),
            1,
        )
        .unwrap();
        assert_eq!(2, parsed.table.len());
        assert_eq!("A", parsed.table[0].query);
        assert_eq!("B", parsed.table[1].query);
    }

    #[test]
    fn test_missing_directory_has_no_results() {
        init();
        let td = tempfile::TempDir::new().unwrap();
        let missing = td.path().join("nothing_here");
        assert!(find_result_files(&missing, DELTA_EXTENSION)
            .unwrap()
            .is_empty());
        let parsed = parse_alignment_directory(&missing, DELTA_EXTENSION, &lengths(&[]), 0).unwrap();
        assert!(parsed.table.is_empty());
    }
}
