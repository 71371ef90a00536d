//! Readers for count matrices and sample metadata (CSV/TSV and spreadsheets)

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use calamine::{open_workbook_auto, Reader};

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{DgeError, Result};

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

fn display_name(path: &Path) -> String {
    path.display().to_string()
}

/// Tab if the header line contains a tab, comma otherwise
fn detect_delimiter(header_line: &str) -> u8 {
    if header_line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Read a delimited file into trimmed string records, header first
fn read_delimited(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut first_line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first_line)?;
    let delimiter = detect_delimiter(&first_line);

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_path(path)?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        records.push(record.iter().map(|f| f.to_string()).collect());
    }
    Ok(records)
}

/// Read a count matrix from a CSV or TSV file
///
/// Layout: first column is the gene identifier, the header row names samples.
/// A non-numeric cell counts as zero when the row has at least one numeric cell;
/// a row with no numeric cells at all is dropped. Rows sharing an identifier are summed.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let file = display_name(path);
    let records = read_delimited(path)?;
    parse_count_records(&file, records)
}

/// Parse count matrix records from any reader (header row first)
pub fn read_count_matrix_from_reader<R: Read>(source: &str, reader: R, delimiter: u8) -> Result<CountMatrix> {
    let mut rdr = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        records.push(record.iter().map(|f| f.to_string()).collect());
    }
    parse_count_records(source, records)
}

fn parse_count_records(file: &str, records: Vec<Vec<String>>) -> Result<CountMatrix> {
    let mut records = records.into_iter();
    let header = records
        .next()
        .ok_or_else(|| DgeError::parse(file, "file is empty"))?;

    if header.len() < 2 {
        return Err(DgeError::parse(file, "header must name at least one sample column"));
    }
    let sample_ids: Vec<String> = header[1..].to_vec();
    let n_samples = sample_ids.len();

    let mut rows: Vec<(String, Vec<f64>)> = Vec::new();
    let mut n_dropped = 0usize;
    let mut n_rounded = 0usize;

    for (line_no, fields) in records.enumerate() {
        let gene_id = fields[0].clone();
        if gene_id.is_empty() {
            n_dropped += 1;
            continue;
        }

        let mut values = vec![0.0; n_samples];
        let mut any_numeric = false;
        for (j, cell) in fields.iter().skip(1).take(n_samples).enumerate() {
            let Ok(value) = cell.parse::<f64>() else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            if value < 0.0 {
                return Err(DgeError::parse(
                    file,
                    format!(
                        "negative count {} for gene '{}' in sample '{}' (data row {})",
                        value,
                        gene_id,
                        sample_ids[j],
                        line_no + 1
                    ),
                ));
            }
            if value.fract() != 0.0 {
                n_rounded += 1;
            }
            values[j] = value.round();
            any_numeric = true;
        }

        if any_numeric {
            rows.push((gene_id, values));
        } else {
            n_dropped += 1;
        }
    }

    if n_dropped > 0 {
        log::warn!("{}: dropped {} row(s) without any numeric count", file, n_dropped);
    }
    if n_rounded > 0 {
        log::warn!(
            "{}: {} non-integer count(s) rounded to the nearest integer",
            file,
            n_rounded
        );
    }
    if rows.is_empty() {
        return Err(DgeError::parse(file, "no gene rows after the header"));
    }

    CountMatrix::from_rows(rows, sample_ids).map_err(|e| DgeError::parse(file, e.to_string()))
}

/// Read sample metadata from CSV/TSV or a spreadsheet (first worksheet)
///
/// The sample column is the first header containing "sample" and the condition
/// column the first header containing "condition", both case-insensitive.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let path = path.as_ref();
    let file = display_name(path);

    let is_spreadsheet = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    let records = if is_spreadsheet {
        read_spreadsheet(path)?
    } else {
        read_delimited(path)?
    };
    metadata_from_records(&file, records)
}

fn read_spreadsheet(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DgeError::parse(display_name(path), "workbook has no worksheets"))??;

    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string().trim().to_string()).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect())
}

fn metadata_from_records(file: &str, records: Vec<Vec<String>>) -> Result<SampleMetadata> {
    let mut records = records.into_iter();
    let header = records
        .next()
        .ok_or_else(|| DgeError::parse(file, "file is empty"))?;

    let find_column = |needle: &str| {
        header
            .iter()
            .position(|h| h.to_ascii_lowercase().contains(needle))
            .ok_or_else(|| DgeError::parse(file, format!("no column header containing '{}'", needle)))
    };
    let sample_col = find_column("sample")?;
    let condition_col = find_column("condition")?;

    let mut pairs = Vec::new();
    for fields in records {
        let sample = fields.get(sample_col).map(String::as_str).unwrap_or("");
        let condition = fields.get(condition_col).map(String::as_str).unwrap_or("");
        if sample.is_empty() {
            continue;
        }
        if condition.is_empty() {
            return Err(DgeError::parse(file, format!("sample '{}' has an empty condition", sample)));
        }
        pairs.push((sample.to_string(), condition.to_string()));
    }

    if pairs.is_empty() {
        return Err(DgeError::parse(file, "no sample rows after the header"));
    }

    SampleMetadata::from_pairs(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_count_matrix_tsv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\ts1\ts2\ts3").unwrap();
        writeln!(file, "gene1\t100\t200\t150").unwrap();
        writeln!(file, "gene2\t50\t75\t60").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
    }

    #[test]
    fn test_read_count_matrix_csv_with_quotes_and_gaps() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "\"id\",\"a\",\"b\"").unwrap();
        writeln!(file, "\"TP53\",10,NA").unwrap();
        writeln!(file, "junk,x,y").unwrap();
        writeln!(file, "TP53,1,2").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.gene_ids(), &["TP53".to_string()][..]);
        // NA counted as zero, duplicate row summed, junk row dropped
        assert_eq!(matrix.gene_counts(0).to_vec(), vec![11.0, 2.0]);
    }

    #[test]
    fn test_negative_count_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,a").unwrap();
        writeln!(file, "g,-1").unwrap();
        assert!(matches!(read_count_matrix(file.path()), Err(DgeError::Parse { .. })));
    }

    #[test]
    fn test_empty_after_header_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,a,b").unwrap();
        assert!(matches!(read_count_matrix(file.path()), Err(DgeError::Parse { .. })));
    }

    #[test]
    fn test_fractional_counts_rounded() {
        let data = "id,a,b\ng,1.4,2.6\n";
        let m = read_count_matrix_from_reader("inline", data.as_bytes(), b',').unwrap();
        assert_eq!(m.gene_counts(0).to_vec(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_read_metadata_column_detection() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Batch\tSampleName\tCondition_Group").unwrap();
        writeln!(file, "1\ts1\tctrl").unwrap();
        writeln!(file, "1\ts2\ttreat").unwrap();

        let meta = read_metadata(file.path()).unwrap();
        assert_eq!(meta.condition_of("s2"), Some("treat"));
        assert_eq!(meta.n_samples(), 2);
    }

    #[test]
    fn test_read_metadata_missing_condition_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample,group").unwrap();
        writeln!(file, "s1,a").unwrap();
        let err = read_metadata(file.path()).unwrap_err();
        assert!(matches!(err, DgeError::Parse { .. }));
        assert!(err.to_string().contains("condition"));
    }
}
