//! rust_dge command-line interface

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use log::{info, warn, LevelFilter};
use serde::Serialize;

use rust_dge::cli::{Cli, Commands, RunArgs};
use rust_dge::io::{write_cluster_table, write_comparison_tables, write_enrichment_table, write_json};
use rust_dge::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "detect", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_dge {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run(run)) => run_analysis(&run).await,
        Some(Commands::Detect { counts, sample_size }) => run_detect(&counts, sample_size),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_dge v{}", VERSION);
    println!("Run `rust_dge -h` for usage or `rust_dge --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_dge v{}", VERSION);
    println!();
    println!("Usage: rust_dge <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run     Differential expression, clustering and enrichment");
    println!("  detect  Detect the identifier namespace of a count matrix");
    println!();
    println!("Run `rust_dge <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_dge v{}", VERSION);
    println!("Differential gene expression analysis in Rust");
    println!();
    println!("Usage: rust_dge <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run     Differential expression, clustering and enrichment");
    println!("            - Ensembl/Entrez/UniProt identifiers resolved to gene symbols");
    println!("            - Moderated negative binomial GLM, Wald test, BH with independent filtering");
    println!("            - Pairwise or one-vs-rest comparisons");
    println!("            - Heatmap ordering: ward.D2, complete, average, single linkage");
    println!("            - Preranked GSEA against GMT databases (symbol or Entrez ids)");
    println!("  detect  Detect the identifier namespace of a count matrix");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_dge run -c counts.csv -m metadata.csv -b control --comparison treated");
    println!();
    println!("  rust_dge run -c counts.tsv -m samples.xlsx --one-vs-rest -b control \\");
    println!("    --gmt GO=go_bp.gmt --gmt KEGG=kegg.gmt:entrez --id-map ids.tsv -o out/");
    println!();
    println!("  rust_dge detect -c counts.csv");
}

// ---------------------------------------------------------------------------
// summary.json
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunSummary {
    version: &'static str,
    source_namespace: IdNamespace,
    namespace: IdNamespace,
    identifiers: ResolutionStats,
    config: AnalysisConfig,
    comparisons: Vec<ComparisonReport>,
}

#[derive(Serialize)]
struct ComparisonReport {
    comparison: String,
    failed_stage: Option<AnalysisStage>,
    error: Option<String>,
    cluster_fallback: Option<String>,
    enrichment_errors: Vec<DatabaseError>,
    summary: Option<StructuredSummary>,
}

#[derive(Serialize)]
struct DatabaseError {
    database: String,
    error: String,
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn run_analysis(args: &RunArgs) -> Result<()> {
    let config = args.analysis_config()?;

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .ok();
    }

    let mode = if args.one_vs_rest {
        ComparisonMode::OneVsRest {
            baseline: args.baseline.clone(),
        }
    } else {
        match (&args.baseline, &args.comparison) {
            (Some(baseline), Some(comparison)) => ComparisonMode::Pairwise {
                baseline: baseline.clone(),
                comparison: comparison.clone(),
            },
            _ => {
                return Err(DgeError::InvalidInput {
                    reason: "--baseline and --comparison are required unless --one-vs-rest is given".to_string(),
                })
            }
        }
    };

    let translator = if let Some(path) = &args.id_map {
        info!("Loading identifier mapping table from {}", path);
        Some(AnyTranslator::Table(TableTranslator::from_tsv(path)?))
    } else if args.online {
        let request_timeout = Duration::from_secs(config.translation.timeout_secs);
        Some(AnyTranslator::MyGene(MyGeneTranslator::new(
            &config.translation.species,
            request_timeout,
        )?))
    } else {
        None
    };

    let output_dir = Path::new(&args.output);
    std::fs::create_dir_all(output_dir)?;

    let (progress, mut progress_rx) = progress_channel();
    let console_log = tokio::spawn(async move {
        let mut lines = Vec::new();
        while let Some(message) = progress_rx.recv().await {
            if let Progress::Console(line) = message {
                lines.push(line);
            }
        }
        lines
    });

    let mut session = AnalysisSession::<AnyTranslator>::new(config.clone())
        .with_progress(progress)
        .with_gene_sets(args.gene_set_sources()?);
    if let Some(translator) = translator {
        session = session.with_translator(translator);
    }

    session.initialize().await?;
    let dataset = session
        .load_files(Path::new(&args.counts), Path::new(&args.metadata))
        .await?;
    let (source_namespace, namespace, identifiers) =
        (dataset.source_namespace, dataset.namespace, dataset.resolution.clone());

    let outcomes = session.run_comparisons(&mode).await?;
    let databases = session.database_names().await;

    let mut reports = Vec::with_capacity(outcomes.len());
    for (name, outcome) in outcomes {
        let results = match outcome {
            Ok(results) => results,
            Err(failure) => {
                eprintln!("Error: {}", failure);
                reports.push(ComparisonReport {
                    comparison: name,
                    failed_stage: Some(failure.stage),
                    error: Some(failure.error.to_string()),
                    cluster_fallback: None,
                    enrichment_errors: Vec::new(),
                    summary: None,
                });
                continue;
            }
        };

        let significance = session.significance(&name)?;
        let summary = significance.summary();
        info!(
            "{}: {} tested, {} up, {} down (padj < {}, |log2FC| > {})",
            name, summary.tested, summary.up, summary.down, summary.padj_threshold, summary.log2fc_threshold
        );
        for path in write_comparison_tables(output_dir, &results, &significance)? {
            info!("Wrote {}", path.display());
        }

        let mut enrichment_errors = Vec::new();
        for database in &databases {
            match session.enrichment(&name, database).await {
                Ok(sets) => {
                    let path = write_enrichment_table(output_dir, &name, database, &sets)?;
                    info!("Wrote {} ({} enriched sets)", path.display(), sets.len());
                }
                Err(e) => {
                    warn!("{}", e);
                    enrichment_errors.push(DatabaseError {
                        database: database.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let ordering = session.cluster(&name, None, None).await?;
        let path = write_cluster_table(output_dir, &name, &ordering)?;
        info!("Wrote {}", path.display());

        reports.push(ComparisonReport {
            comparison: name.clone(),
            failed_stage: None,
            error: None,
            cluster_fallback: ordering.fallback,
            enrichment_errors,
            summary: Some(session.structured_summary(&name, args.top_n)?),
        });
    }

    // the console channel closes once the session is gone
    drop(session);
    let console_lines = console_log.await.unwrap_or_default();
    if !console_lines.is_empty() {
        std::fs::write(output_dir.join("console.log"), console_lines.join("\n") + "\n")?;
    }

    let n_failed = reports.iter().filter(|r| r.error.is_some()).count();
    let n_total = reports.len();
    let summary_path = output_dir.join("summary.json");
    write_json(
        &summary_path,
        &RunSummary {
            version: VERSION,
            source_namespace,
            namespace,
            identifiers,
            config,
            comparisons: reports,
        },
    )?;
    info!("Wrote {}", summary_path.display());

    if n_failed > 0 {
        return Err(DgeError::InvalidInput {
            reason: format!("{} of {} comparisons failed, see {}", n_failed, n_total, summary_path.display()),
        });
    }
    Ok(())
}

fn run_detect(counts_path: &str, sample_size: usize) -> Result<()> {
    let matrix = read_count_matrix(counts_path)?;
    let params = DetectionParams {
        sample_size,
        ..DetectionParams::default()
    };
    let namespace = NamespaceDetector::new(&params)?.detect(matrix.gene_ids());
    info!(
        "{} genes x {} samples, scored the first {} identifiers",
        matrix.n_genes(),
        matrix.n_samples(),
        sample_size.min(matrix.n_genes())
    );
    println!("{}", namespace);
    Ok(())
}
