//! Command-line interface for rust_dge

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AnalysisConfig;
use crate::enrichment::SetNamespace;
use crate::error::{DgeError, Result};
use crate::session::GeneSetSource;

#[derive(Parser)]
#[command(name = "rust_dge")]
#[command(version)]
#[command(about = "Differential gene expression, clustering and gene-set enrichment")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run differential expression, clustering and enrichment
    #[command(
        about = "Run differential expression, clustering and enrichment",
        long_about = "Run differential expression, clustering and enrichment\n\n\
            Resolves gene identifiers to symbols, fits a moderated negative binomial\n\
            model per comparison, classifies significant genes, orders them for a\n\
            heatmap and runs ranked gene-set enrichment against each GMT database.",
        after_long_help = "\
Examples:
  # One comparison
  rust_dge run -c counts.csv -m metadata.csv -b control --comparison treated -o out/

  # Every condition against the baseline, with two gene-set databases
  rust_dge run -c counts.tsv -m samples.xlsx --one-vs-rest -b control \\
    --gmt GO=go_bp.gmt --gmt KEGG=kegg.gmt:entrez --id-map ids.tsv

  # Ensembl input translated online, average linkage, stricter cutoff
  rust_dge run -c counts.csv -m metadata.csv -b wt --comparison ko \\
    --online --linkage average --padj 0.01"
    )]
    Run(RunArgs),

    /// Detect the identifier namespace of a count matrix
    #[command(
        long_about = "Detect the identifier namespace of a count matrix.\n\n\
            Scores the leading row identifiers against Ensembl, UniProt, Entrez and\n\
            gene-symbol patterns, in that order.",
        after_long_help = "\
Examples:
  rust_dge detect -c counts.csv"
    )]
    Detect {
        /// Path to count matrix CSV/TSV file
        #[arg(short, long)]
        counts: String,

        /// Number of leading identifiers scored [default: 100]
        #[arg(long, default_value = "100")]
        sample_size: usize,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to count matrix CSV/TSV file
    #[arg(short, long,
        long_help = "Path to count matrix file.\n\
            Format: first column = gene identifiers, header row = sample names,\n\
            remaining cells = raw counts. Comma or tab delimited (auto-detected).")]
    pub counts: String,

    /// Path to sample metadata file (CSV, TSV or spreadsheet)
    #[arg(short, long,
        long_help = "Path to sample metadata file.\n\
            Needs a column whose header contains \"sample\" and one containing\n\
            \"condition\" (case-insensitive). .xlsx/.xls/.ods files are read\n\
            from the first worksheet.")]
    pub metadata: String,

    /// Baseline condition
    #[arg(short, long,
        long_help = "Baseline condition. Fold changes are reported relative to it.\n\
            With --one-vs-rest it defaults to the alphabetically first condition.")]
    pub baseline: Option<String>,

    /// Condition compared against the baseline
    #[arg(long)]
    pub comparison: Option<String>,

    /// Compare every other condition against the baseline
    #[arg(long, conflicts_with = "comparison")]
    pub one_vs_rest: bool,

    /// Output directory [default: dge_results]
    #[arg(short, long, default_value = "dge_results")]
    pub output: String,

    /// JSON configuration file
    #[arg(long,
        long_help = "JSON configuration file. Any field may be omitted and keeps its\n\
            default; command-line flags override values from the file.")]
    pub config: Option<String>,

    /// Adjusted p-value threshold [default: 0.05]
    #[arg(long)]
    pub padj: Option<f64>,

    /// Absolute log2 fold change threshold [default: 1.0]
    #[arg(long)]
    pub log2fc: Option<f64>,

    /// Linkage for heatmap clustering [default: ward.D2]
    #[arg(long,
        long_help = "Linkage method for heatmap clustering.\n\
            ward.D2:  Ward's minimum variance on squared distances\n\
            complete: Maximum pairwise distance\n\
            average:  Mean pairwise distance (UPGMA)\n\
            single:   Minimum pairwise distance")]
    pub linkage: Option<String>,

    /// Gene-set database (NAME=PATH[:entrez])
    #[arg(long, value_name = "NAME=PATH[:entrez]",
        long_help = "Gene-set database in GMT format.\n\
            Format: NAME=PATH, optionally suffixed with :entrez when the sets\n\
            use Entrez ids (requires --id-map or --online).\n\
            Can be specified multiple times.")]
    pub gmt: Vec<String>,

    /// Offline identifier mapping table (TSV)
    #[arg(long, conflicts_with = "online",
        long_help = "Tab-separated identifier mapping table.\n\
            The header names the namespace of each column,\n\
            e.g. \"ensembl<TAB>symbol<TAB>entrez\".")]
    pub id_map: Option<String>,

    /// Translate identifiers with the mygene.info service
    #[arg(long)]
    pub online: bool,

    /// Species hint for online translation [default: human]
    #[arg(long)]
    pub species: Option<String>,

    /// Permutations for enrichment p-values [default: 1000]
    #[arg(long)]
    pub permutations: Option<usize>,

    /// Random seed for enrichment permutations [default: 42]
    #[arg(long)]
    pub seed: Option<u32>,

    /// Genes and gene sets listed per comparison in summary.json [default: 10]
    #[arg(long, default_value = "10")]
    pub top_n: usize,

    /// Number of threads (0 = auto) [default: 0]
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,
}

impl RunArgs {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn analysis_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_json_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(padj) = self.padj {
            config.thresholds.padj = padj;
        }
        if let Some(log2fc) = self.log2fc {
            config.thresholds.log2fc = log2fc;
        }
        if let Some(linkage) = &self.linkage {
            config.cluster.method = linkage.parse()?;
        }
        if let Some(species) = &self.species {
            config.translation.species = species.clone();
        }
        if let Some(permutations) = self.permutations {
            config.gsea.permutations = permutations;
        }
        if let Some(seed) = self.seed {
            config.gsea.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn gene_set_sources(&self) -> Result<Vec<GeneSetSource>> {
        self.gmt.iter().map(|arg| parse_gmt_arg(arg)).collect()
    }
}

/// Parse `NAME=PATH[:entrez]`
pub fn parse_gmt_arg(arg: &str) -> Result<GeneSetSource> {
    let invalid = || DgeError::InvalidInput {
        reason: format!("invalid --gmt '{}', expected NAME=PATH[:entrez]", arg),
    };
    let (name, rest) = arg.split_once('=').ok_or_else(invalid)?;
    let (name, rest) = (name.trim(), rest.trim());
    if name.is_empty() || rest.is_empty() {
        return Err(invalid());
    }

    let (path, namespace) = match rest.rsplit_once(':') {
        Some((path, suffix)) if !path.is_empty() => match suffix.parse::<SetNamespace>() {
            Ok(ns) => (path, ns),
            Err(_) => (rest, SetNamespace::Symbol),
        },
        _ => (rest, SetNamespace::Symbol),
    };
    Ok(GeneSetSource {
        name: name.to_string(),
        path: PathBuf::from(path),
        namespace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LinkageMethod;

    #[test]
    fn test_gmt_arg() {
        let s = parse_gmt_arg("KEGG=/data/kegg.gmt:entrez").unwrap();
        assert_eq!(s.name, "KEGG");
        assert_eq!(s.path, PathBuf::from("/data/kegg.gmt"));
        assert_eq!(s.namespace, SetNamespace::Entrez);

        let s = parse_gmt_arg("GO=go.gmt").unwrap();
        assert_eq!(s.namespace, SetNamespace::Symbol);

        let s = parse_gmt_arg("H=C:/sets/h.gmt").unwrap();
        assert_eq!(s.path, PathBuf::from("C:/sets/h.gmt"));

        assert!(parse_gmt_arg("go.gmt").is_err());
        assert!(parse_gmt_arg("=go.gmt").is_err());
    }

    #[test]
    fn test_run_flags_override_defaults() {
        let cli = Cli::parse_from([
            "rust_dge", "run", "-c", "counts.csv", "-m", "meta.csv", "--one-vs-rest", "--padj", "0.01",
            "--linkage", "average", "--gmt", "GO=go.gmt", "-v",
        ]);
        assert!(cli.verbose);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert!(args.one_vs_rest);
        let config = args.analysis_config().unwrap();
        assert_eq!(config.thresholds.padj, 0.01);
        assert_eq!(config.thresholds.log2fc, 1.0);
        assert_eq!(config.cluster.method, LinkageMethod::Average);
        assert_eq!(args.gene_set_sources().unwrap().len(), 1);
    }

    #[test]
    fn test_bad_overrides_are_rejected() {
        let cli = Cli::parse_from(["rust_dge", "run", "-c", "c.csv", "-m", "m.csv", "--linkage", "centroid"]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert!(args.analysis_config().is_err());
    }
}
