//! Preranked GSEA with a gene-permutation null

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{GeneSetDatabase, RankedGenes};
use crate::error::{DgeError, Result};
use crate::rng::MersenneTwister;
use crate::stats::cmp_f64;
use crate::testing::benjamini_hochberg;

/// Parameters for enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GseaParams {
    /// Sets with fewer ranked members are not tested
    pub min_size: usize,
    /// Sets with more ranked members are not tested
    pub max_size: usize,
    pub permutations: usize,
    /// Exponent on |score| in the running sum (0 is the classic KS statistic)
    pub weight: f64,
    /// Sets with adjusted p-value above this are not reported
    pub pvalue_cutoff: f64,
    pub seed: u32,
}

impl Default for GseaParams {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 500,
            permutations: 1000,
            weight: 1.0,
            pvalue_cutoff: 0.05,
            seed: 42,
        }
    }
}

impl GseaParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 || self.min_size > self.max_size {
            return Err(DgeError::InvalidInput {
                reason: format!("invalid gene-set size bounds [{}, {}]", self.min_size, self.max_size),
            });
        }
        if self.permutations == 0 {
            return Err(DgeError::InvalidInput {
                reason: "at least one permutation is required".to_string(),
            });
        }
        if !(self.weight >= 0.0) {
            return Err(DgeError::InvalidInput {
                reason: format!("weight must be non-negative, got {}", self.weight),
            });
        }
        Ok(())
    }
}

/// Enrichment of one gene set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GseaResult {
    pub id: String,
    pub description: String,
    /// Members present in the ranking
    pub set_size: usize,
    pub enrichment_score: f64,
    pub nes: f64,
    pub pvalue: f64,
    pub padj: f64,
    /// Leading-edge members in ranking order
    pub core_enrichment: Vec<String>,
}

/// Extreme of the running sum and where it occurs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningScore {
    pub es: f64,
    /// Rank position of the extreme
    pub peak: usize,
}

/// Enrichment score for the set whose members sit at the sorted rank
/// positions `hits` among `weights.len()` genes
///
/// The running sum steps up by w/NR at members and down by 1/(N - k)
/// elsewhere; the score is its largest deviation from zero, 0 when the
/// positive and negative extremes tie.
pub fn enrichment_score(weights: &[f64], hits: &[usize]) -> RunningScore {
    let n = weights.len();
    let k = hits.len();
    if k == 0 || k >= n {
        return RunningScore { es: 0.0, peak: 0 };
    }
    let mut nr: f64 = hits.iter().map(|&h| weights[h]).sum();
    let uniform = !(nr > 0.0);
    if uniform {
        nr = k as f64;
    }
    let miss_step = 1.0 / (n - k) as f64;

    let mut cum = 0.0;
    let (mut max_p, mut max_at) = (0.0_f64, 0usize);
    let (mut min_n, mut min_at) = (0.0_f64, 0usize);
    for (j, &pos) in hits.iter().enumerate() {
        let misses = (pos - j) as f64 * miss_step;
        let before = cum / nr - misses;
        if before < min_n {
            min_n = before;
            min_at = pos - 1;
        }
        cum += if uniform { 1.0 } else { weights[pos] };
        let after = cum / nr - misses;
        if after > max_p {
            max_p = after;
            max_at = pos;
        }
    }
    if max_p > -min_n {
        RunningScore { es: max_p, peak: max_at }
    } else if max_p < -min_n {
        RunningScore { es: min_n, peak: min_at }
    } else {
        RunningScore { es: 0.0, peak: 0 }
    }
}

struct Candidate<'a> {
    id: &'a str,
    description: &'a str,
    hits: Vec<usize>,
}

/// Run enrichment of `ranked` against every set of `database`
///
/// Returns only sets passing the adjusted p-value cutoff, ordered by
/// adjusted p-value, then |NES| descending, then id. No testable set, or no
/// significant one, gives an empty list.
pub fn gsea(ranked: &RankedGenes, database: &GeneSetDatabase, params: &GseaParams) -> Result<Vec<GseaResult>> {
    params.validate()?;
    let n = ranked.len();

    let position: HashMap<&str, usize> = ranked.genes.iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();
    let candidates: Vec<Candidate> = database
        .sets
        .iter()
        .filter_map(|set| {
            let mut hits: Vec<usize> = set
                .genes
                .iter()
                .filter_map(|g| position.get(g.as_str()).copied())
                .collect::<HashSet<usize>>()
                .into_iter()
                .collect();
            hits.sort_unstable();
            (hits.len() >= params.min_size && hits.len() <= params.max_size && hits.len() < n).then_some(Candidate {
                id: &set.id,
                description: &set.description,
                hits,
            })
        })
        .collect();

    log::info!(
        "GSEA on {}: {} of {} sets within size bounds [{}, {}] over {} ranked genes",
        database.name,
        candidates.len(),
        database.len(),
        params.min_size,
        params.max_size,
        n
    );
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let weights: Vec<f64> = ranked.scores.iter().map(|s| s.abs().powf(params.weight)).collect();

    let mut sizes: Vec<usize> = candidates.iter().map(|c| c.hits.len()).collect();
    sizes.sort_unstable();
    sizes.dedup();
    log::debug!("GSEA on {}: {} null distributions for {} sets", database.name, sizes.len(), candidates.len());
    let nulls: HashMap<usize, Vec<f64>> = sizes
        .par_iter()
        .map(|&k| (k, null_scores(&weights, k, params)))
        .collect();

    let tested: Vec<(usize, RunningScore, f64, f64)> = candidates
        .par_iter()
        .enumerate()
        .map(|(c, cand)| {
            let observed = enrichment_score(&weights, &cand.hits);
            let (nes, pvalue) = match nulls.get(&cand.hits.len()).and_then(|null| normalize(observed.es, null)) {
                Some(scored) => scored,
                None => {
                    log::warn!(
                        "Gene set '{}': no permutation score shares the sign of ES {:.4}; reporting NES 0, p 1",
                        cand.id,
                        observed.es
                    );
                    (0.0, 1.0)
                }
            };
            (c, observed, nes, pvalue)
        })
        .collect();

    let pvalues: Vec<f64> = tested.iter().map(|t| t.3).collect();
    let padj = benjamini_hochberg(&pvalues);

    let mut results: Vec<GseaResult> = tested
        .into_iter()
        .zip(padj)
        .filter(|(_, q)| *q <= params.pvalue_cutoff)
        .map(|((c, observed, nes, pvalue), padj)| {
            let cand = &candidates[c];
            GseaResult {
                id: cand.id.to_string(),
                description: cand.description.to_string(),
                set_size: cand.hits.len(),
                enrichment_score: observed.es,
                nes,
                pvalue,
                padj,
                core_enrichment: leading_edge(ranked, &cand.hits, observed),
            }
        })
        .collect();

    results.sort_by(|a, b| {
        cmp_f64(&a.padj, &b.padj)
            .then_with(|| cmp_f64(&b.nes.abs(), &a.nes.abs()))
            .then_with(|| a.id.cmp(&b.id))
    });
    log::info!("GSEA on {}: {} significant sets", database.name, results.len());
    Ok(results)
}

/// Enrichment scores of `params.permutations` random sets of size `k`
///
/// One null per set size, seeded by the size, so a set's p-value does not
/// depend on which other sets are tested alongside it.
fn null_scores(weights: &[f64], k: usize, params: &GseaParams) -> Vec<f64> {
    let mut rng = MersenneTwister::for_stream(params.seed, k);
    let mut pool: Vec<usize> = (0..weights.len()).collect();
    let mut sample: Vec<usize> = Vec::with_capacity(k);
    (0..params.permutations)
        .map(|_| {
            rng.shuffle_prefix(&mut pool, k);
            sample.clear();
            sample.extend_from_slice(&pool[..k]);
            sample.sort_unstable();
            enrichment_score(weights, &sample).es
        })
        .collect()
}

/// NES against the same-signed null mean, and the permutation p-value
fn normalize(es: f64, null: &[f64]) -> Option<(f64, f64)> {
    let positive = es >= 0.0;
    let same_sign: Vec<f64> = null
        .iter()
        .copied()
        .filter(|&x| if positive { x >= 0.0 } else { x <= 0.0 })
        .collect();
    if same_sign.is_empty() {
        return None;
    }
    let null_mean = crate::stats::mean(&same_sign).abs();
    let extreme = same_sign
        .iter()
        .filter(|&&x| if positive { x >= es } else { x <= es })
        .count();
    let pvalue = ((extreme + 1) as f64 / (same_sign.len() + 1) as f64).min(1.0);
    let nes = if null_mean > 0.0 { es / null_mean } else { 0.0 };
    Some((nes, pvalue))
}

fn leading_edge(ranked: &RankedGenes, hits: &[usize], score: RunningScore) -> Vec<String> {
    let keep = |pos: usize| {
        if score.es > 0.0 {
            pos <= score.peak
        } else if score.es < 0.0 {
            pos > score.peak
        } else {
            false
        }
    };
    hits.iter().filter(|&&p| keep(p)).map(|&p| ranked.genes[p].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{GeneSet, SetNamespace};

    fn ranking(n: usize) -> RankedGenes {
        RankedGenes {
            genes: (0..n).map(|i| format!("G{}", i)).collect(),
            scores: (0..n).map(|i| (n as f64 / 2.0 - i as f64) / 10.0).collect(),
        }
    }

    fn set(id: &str, members: impl Iterator<Item = usize>) -> GeneSet {
        GeneSet {
            id: id.to_string(),
            description: format!("{} set", id),
            genes: members.map(|i| format!("G{}", i)).collect(),
        }
    }

    #[test]
    fn test_enrichment_score_extremes() {
        let w = vec![1.0; 10];
        assert!((enrichment_score(&w, &[0, 1]).es - 1.0).abs() < 1e-12);
        assert!((enrichment_score(&w, &[8, 9]).es + 1.0).abs() < 1e-12);
        let spread = enrichment_score(&w, &[0, 9]);
        assert!(spread.es.abs() < 1.0);
    }

    #[test]
    fn test_enrichment_score_matches_brute_force() {
        let w: Vec<f64> = (0..20).map(|i| ((20 - i) as f64).powf(1.0)).collect();
        let hits = [1, 4, 5, 11, 17];
        let nr: f64 = hits.iter().map(|&h| w[h]).sum();
        let mut run = 0.0;
        let mut best = 0.0_f64;
        for i in 0..20 {
            if hits.contains(&i) {
                run += w[i] / nr;
            } else {
                run -= 1.0 / 15.0;
            }
            if run.abs() > best.abs() {
                best = run;
            }
        }
        assert!((enrichment_score(&w, &hits).es - best).abs() < 1e-12);
    }

    #[test]
    fn test_top_set_is_enriched() {
        let ranked = ranking(200);
        let db = GeneSetDatabase::new(
            "test",
            SetNamespace::Symbol,
            vec![set("TOP", 0..20), set("BOTTOM", 180..200), set("TINY", 0..3)],
        );
        let params = GseaParams {
            permutations: 200,
            ..GseaParams::default()
        };
        let results = gsea(&ranked, &db, &params).unwrap();
        let top = results.iter().find(|r| r.id == "TOP").unwrap();
        assert!(top.nes > 1.0 && top.padj <= 0.05);
        assert_eq!(top.core_enrichment.first().map(String::as_str), Some("G0"));
        let bottom = results.iter().find(|r| r.id == "BOTTOM").unwrap();
        assert!(bottom.nes < -1.0);
        assert!(bottom.core_enrichment.contains(&"G199".to_string()));
        assert!(results.iter().all(|r| r.id != "TINY"));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let ranked = ranking(100);
        let db = GeneSetDatabase::new("test", SetNamespace::Symbol, vec![set("A", (0..100).step_by(7))]);
        let params = GseaParams {
            permutations: 100,
            pvalue_cutoff: 1.0,
            ..GseaParams::default()
        };
        assert_eq!(gsea(&ranked, &db, &params).unwrap(), gsea(&ranked, &db, &params).unwrap());
    }

    #[test]
    fn test_sets_of_one_size_share_a_null() {
        let ranked = ranking(120);
        let params = GseaParams {
            permutations: 150,
            pvalue_cutoff: 1.0,
            ..GseaParams::default()
        };
        // same members under two ids
        let twins = GeneSetDatabase::new(
            "test",
            SetNamespace::Symbol,
            vec![set("A", (0..120).step_by(9)), set("B", (0..120).step_by(9))],
        );
        let results = gsea(&ranked, &twins, &params).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].pvalue, results[1].pvalue);
        assert_eq!(results[0].nes, results[1].nes);

        // an extra set of another size leaves A's score untouched
        let alone = GeneSetDatabase::new("test", SetNamespace::Symbol, vec![set("A", (0..120).step_by(9))]);
        let mixed = GeneSetDatabase::new(
            "test",
            SetNamespace::Symbol,
            vec![set("C", 0..30), set("A", (0..120).step_by(9))],
        );
        let a_alone = gsea(&ranked, &alone, &params).unwrap();
        let a_mixed = gsea(&ranked, &mixed, &params).unwrap();
        let a_mixed = a_mixed.iter().find(|r| r.id == "A").unwrap();
        assert_eq!(a_alone[0].pvalue, a_mixed.pvalue);
        assert_eq!(a_alone[0].nes, a_mixed.nes);
    }

    #[test]
    fn test_null_without_same_sign_scores() {
        assert_eq!(normalize(0.4, &[-0.2, -0.1]), None);
        let (nes, p) = normalize(0.4, &[0.2, 0.4, -0.3]).unwrap();
        assert!((nes - 0.4 / 0.3).abs() < 1e-12);
        assert!((p - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_testable_set_is_empty_not_error() {
        let ranked = ranking(8);
        let db = GeneSetDatabase::new("test", SetNamespace::Symbol, vec![set("A", 0..5), set("B", 2..8)]);
        assert!(gsea(&ranked, &db, &GseaParams::default()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_bounds() {
        let params = GseaParams {
            min_size: 20,
            max_size: 10,
            ..GseaParams::default()
        };
        let db = GeneSetDatabase::new("test", SetNamespace::Symbol, vec![]);
        assert!(gsea(&ranking(10), &db, &params).is_err());
    }
}
