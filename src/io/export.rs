//! Tabular and JSON exports
//!
//! Every writer formats floats with fixed precision so the same results
//! always produce the same bytes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cluster::ClusterOrdering;
use crate::de::{DeResults, GeneResult};
use crate::enrichment::GseaResult;
use crate::error::Result;
use crate::significance::Significance;

const GENE_HEADER: &str = "gene_id\tbaseMean\tlog2FoldChange\tlfcSE\tstat\tpvalue\tpadj\tnegLog10padj\tdispersion";

/// Write gene rows in the given order
pub fn write_gene_results<'a, W, I>(mut out: W, genes: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a GeneResult>,
{
    writeln!(out, "{}", GENE_HEADER)?;
    for g in genes {
        writeln!(
            out,
            "{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6e}\t{:.6e}\t{:.6}\t{:.6e}",
            g.gene_id,
            g.base_mean,
            g.log2_fold_change,
            g.lfc_se,
            g.stat,
            g.pvalue,
            g.padj,
            g.neg_log10_padj(),
            g.dispersion
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Enrichment table; core genes joined with '/'
pub fn write_enrichment<W: Write>(mut out: W, results: &[GseaResult]) -> Result<()> {
    writeln!(
        out,
        "ID\tDescription\tsetSize\tenrichmentScore\tNES\tpvalue\tp.adjust\tcore_enrichment"
    )?;
    for r in results {
        writeln!(
            out,
            "{}\t{}\t{}\t{:.6}\t{:.6}\t{:.6e}\t{:.6e}\t{}",
            r.id,
            r.description,
            r.set_size,
            r.enrichment_score,
            r.nes,
            r.pvalue,
            r.padj,
            r.core_enrichment.join("/")
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_cluster_order<W: Write>(mut out: W, ordering: &ClusterOrdering) -> Result<()> {
    writeln!(out, "rank\tgene_id")?;
    for (i, gene) in ordering.genes.iter().enumerate() {
        writeln!(out, "{}\t{}", i + 1, gene)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn create(dir: &Path, file: String) -> Result<(PathBuf, BufWriter<File>)> {
    let path = dir.join(file);
    let writer = BufWriter::new(File::create(&path)?);
    Ok((path, writer))
}

/// Write the gene tables of one comparison into `dir`
///
/// `{name}_all.tsv`, `{name}_up.tsv`, `{name}_down.tsv`. Returns the paths written.
pub fn write_comparison_tables(dir: &Path, results: &DeResults, significance: &Significance) -> Result<Vec<PathBuf>> {
    let name = results.name();
    let mut written = Vec::with_capacity(3);

    let (path, out) = create(dir, format!("{}_all.tsv", name))?;
    write_gene_results(out, &results.genes)?;
    written.push(path);

    let (path, out) = create(dir, format!("{}_up.tsv", name))?;
    write_gene_results(out, significance.up.iter().copied())?;
    written.push(path);

    let (path, out) = create(dir, format!("{}_down.tsv", name))?;
    write_gene_results(out, significance.down.iter().copied())?;
    written.push(path);

    Ok(written)
}

/// `{comparison}_gsea_{database}.tsv`
pub fn write_enrichment_table(dir: &Path, comparison: &str, database: &str, results: &[GseaResult]) -> Result<PathBuf> {
    let (path, out) = create(dir, format!("{}_gsea_{}.tsv", comparison, database))?;
    write_enrichment(out, results)?;
    Ok(path)
}

/// `{comparison}_heatmap_order.tsv`
pub fn write_cluster_table(dir: &Path, comparison: &str, ordering: &ClusterOrdering) -> Result<PathBuf> {
    let (path, out) = create(dir, format!("{}_heatmap_order.tsv", comparison))?;
    write_cluster_order(out, ordering)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LinkageMethod;

    fn gene(id: &str, lfc: f64, padj: f64) -> GeneResult {
        GeneResult {
            gene_id: id.to_string(),
            base_mean: 123.456789,
            log2_fold_change: lfc,
            lfc_se: 0.25,
            stat: lfc / 0.25,
            pvalue: padj / 10.0,
            padj,
            dispersion: 0.05,
        }
    }

    #[test]
    fn test_gene_table_is_reproducible() {
        let genes = vec![gene("TP53", 2.5, 0.001), gene("EGFR", -1.25, 0.0)];
        let mut a = Vec::new();
        let mut b = Vec::new();
        write_gene_results(&mut a, &genes).unwrap();
        write_gene_results(&mut b, &genes).unwrap();
        assert_eq!(a, b);

        let text = String::from_utf8(a).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], GENE_HEADER);
        assert_eq!(
            lines[1],
            "TP53\t123.456789\t2.500000\t0.250000\t10.000000\t1.000000e-4\t1.000000e-3\t3.000000\t5.000000e-2"
        );
        assert!(lines[2].contains("\t50.000000\t"));
    }

    #[test]
    fn test_enrichment_table() {
        let rows = vec![GseaResult {
            id: "SET".to_string(),
            description: "a set".to_string(),
            set_size: 12,
            enrichment_score: 0.5,
            nes: 1.75,
            pvalue: 0.001,
            padj: 0.01,
            core_enrichment: vec!["A".to_string(), "B".to_string()],
        }];
        let mut out = Vec::new();
        write_enrichment(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("\tA/B"));
    }

    #[test]
    fn test_cluster_order_and_json() {
        let ordering = ClusterOrdering {
            genes: vec!["B".to_string(), "A".to_string()],
            method: LinkageMethod::Complete,
            fallback: None,
        };
        let mut out = Vec::new();
        write_cluster_order(&mut out, &ordering).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "rank\tgene_id\n1\tB\n2\tA\n");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.json");
        write_json(&path, &ordering).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["method"], "complete");
    }
}
