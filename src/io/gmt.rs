//! Gene-set databases in GMT format
//!
//! One set per line: `id<TAB>description<TAB>gene<TAB>gene...`.

use std::io::Read;
use std::path::Path;

use crate::enrichment::{GeneSet, GeneSetDatabase, SetNamespace};
use crate::error::{DgeError, Result};

/// Read a GMT file as a database called `name`
pub fn read_gmt<P: AsRef<Path>>(path: P, name: &str, namespace: SetNamespace) -> Result<GeneSetDatabase> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    read_gmt_from_reader(&path.display().to_string(), file, name, namespace)
}

/// Parse GMT records from any reader
pub fn read_gmt_from_reader<R: Read>(
    source: &str,
    reader: R,
    name: &str,
    namespace: SetNamespace,
) -> Result<GeneSetDatabase> {
    let mut rdr = ::csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(::csv::Trim::All)
        .from_reader(reader);

    let mut sets = Vec::new();
    let mut n_empty = 0usize;
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let fields: Vec<&str> = record.iter().collect();
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        if fields.len() < 2 || fields[0].is_empty() {
            return Err(DgeError::parse(
                source,
                format!("line {}: expected a set id and description", line + 1),
            ));
        }
        let mut genes: Vec<String> = Vec::with_capacity(fields.len() - 2);
        for g in &fields[2..] {
            if !g.is_empty() && !genes.iter().any(|x| x == g) {
                genes.push(g.to_string());
            }
        }
        if genes.is_empty() {
            n_empty += 1;
            continue;
        }
        sets.push(GeneSet {
            id: fields[0].to_string(),
            description: fields[1].to_string(),
            genes,
        });
    }

    if n_empty > 0 {
        log::warn!("{}: {} gene set(s) without genes skipped", source, n_empty);
    }
    if sets.is_empty() {
        return Err(DgeError::parse(source, "no gene sets found"));
    }
    log::debug!("{}: {} gene sets loaded as '{}' ({})", source, sets.len(), name, namespace);
    Ok(GeneSetDatabase::new(name, namespace, sets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_gmt() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "HALLMARK_P53\thttp://example.org/p53\tTP53\tMDM2\tCDKN1A\tMDM2").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "EMPTY\tnothing here").unwrap();
        writeln!(file, "KEGG_X\tx pathway\t7157\t1956").unwrap();

        let db = read_gmt(file.path(), "hallmark", SetNamespace::Symbol).unwrap();
        assert_eq!(db.name, "hallmark");
        assert_eq!(db.len(), 2);
        assert_eq!(db.sets[0].genes, vec!["TP53", "MDM2", "CDKN1A"]);
        assert_eq!(db.sets[1].description, "x pathway");
    }

    #[test]
    fn test_gmt_without_sets_is_parse_error() {
        let data = "ONLY_ID\n";
        let err = read_gmt_from_reader("mem", data.as_bytes(), "x", SetNamespace::Symbol).unwrap_err();
        assert!(matches!(err, DgeError::Parse { .. }));
    }
}
