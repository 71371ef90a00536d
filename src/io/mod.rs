//! Input/Output: count and metadata readers, gene-set databases, exports

mod csv;
mod export;
mod gmt;

pub use self::csv::{read_count_matrix, read_count_matrix_from_reader, read_metadata};
pub use export::{
    write_cluster_order, write_cluster_table, write_comparison_tables, write_enrichment, write_enrichment_table,
    write_gene_results, write_json,
};
pub use gmt::{read_gmt, read_gmt_from_reader};
