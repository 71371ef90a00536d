//! Agglomerative hierarchical clustering with Lance-Williams updates

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{DgeError, Result};

/// Linkage criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkageMethod {
    /// Ward's minimum variance on squared Euclidean distances
    #[default]
    #[serde(rename = "ward.D2")]
    WardD2,
    #[serde(rename = "complete")]
    Complete,
    /// UPGMA
    #[serde(rename = "average")]
    Average,
    #[serde(rename = "single")]
    Single,
}

impl LinkageMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkageMethod::WardD2 => "ward.D2",
            LinkageMethod::Complete => "complete",
            LinkageMethod::Average => "average",
            LinkageMethod::Single => "single",
        }
    }
}

impl fmt::Display for LinkageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkageMethod {
    type Err = DgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ward.d2" | "ward" | "ward_d2" => Ok(LinkageMethod::WardD2),
            "complete" => Ok(LinkageMethod::Complete),
            "average" | "upgma" => Ok(LinkageMethod::Average),
            "single" => Ok(LinkageMethod::Single),
            other => Err(DgeError::InvalidInput {
                reason: format!("unknown linkage method '{}' (ward.D2, complete, average, single)", other),
            }),
        }
    }
}

/// One merge of the dendrogram
///
/// Node ids below n are leaves; merge k creates node n + k.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dendrogram {
    pub merges: Vec<Merge>,
    /// Leaf indices in display order
    pub order: Vec<usize>,
}

/// Cluster `n` points given their symmetric Euclidean distance matrix
///
/// Ties between equally close pairs go to the pair with the smallest
/// (row, column) indices, and a merged cluster keeps the slot of its
/// smallest member, so the result depends only on the input order.
/// The left child of every merge holds the smaller original index.
pub fn hclust(distances: &Array2<f64>, method: LinkageMethod) -> Result<Dendrogram> {
    let n = distances.nrows();
    if distances.ncols() != n {
        return Err(DgeError::DimensionMismatch {
            expected: format!("square distance matrix ({} x {})", n, n),
            got: format!("{} x {}", n, distances.ncols()),
        });
    }
    if distances.iter().any(|d| !d.is_finite()) {
        return Err(DgeError::ClusteringFailed {
            reason: "distance matrix contains non-finite values".to_string(),
        });
    }
    if n == 0 {
        return Ok(Dendrogram {
            merges: Vec::new(),
            order: Vec::new(),
        });
    }

    let ward = method == LinkageMethod::WardD2;
    let mut dist = distances.to_owned();
    if ward {
        dist.mapv_inplace(|d| d * d);
    }

    let mut size = vec![1usize; n];
    let mut node = (0..n).collect::<Vec<usize>>();
    let mut active = vec![true; n];
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    // Nearest later neighbour of each slot
    let mut nn = vec![usize::MAX; n];
    let mut nn_dist = vec![f64::INFINITY; n];
    let nearest = |dist: &Array2<f64>, active: &[bool], i: usize| -> (usize, f64) {
        let mut best = (usize::MAX, f64::INFINITY);
        for j in (i + 1)..active.len() {
            if active[j] && dist[[i, j]] < best.1 {
                best = (j, dist[[i, j]]);
            }
        }
        best
    };
    for i in 0..n {
        (nn[i], nn_dist[i]) = nearest(&dist, &active, i);
    }

    for step in 0..n - 1 {
        let mut a = usize::MAX;
        let mut best = f64::INFINITY;
        for i in 0..n {
            if active[i] && nn[i] != usize::MAX && nn_dist[i] < best {
                best = nn_dist[i];
                a = i;
            }
        }
        if a == usize::MAX {
            return Err(DgeError::ClusteringFailed {
                reason: "no mergeable pair left".to_string(),
            });
        }
        let b = nn[a];
        let d_ab = dist[[a, b]];
        let (n_a, n_b) = (size[a] as f64, size[b] as f64);

        for c in 0..n {
            if !active[c] || c == a || c == b {
                continue;
            }
            let (d_ac, d_bc) = (dist[[a, c]], dist[[b, c]]);
            let updated = match method {
                LinkageMethod::Single => d_ac.min(d_bc),
                LinkageMethod::Complete => d_ac.max(d_bc),
                LinkageMethod::Average => (n_a * d_ac + n_b * d_bc) / (n_a + n_b),
                LinkageMethod::WardD2 => {
                    let n_c = size[c] as f64;
                    ((n_a + n_c) * d_ac + (n_b + n_c) * d_bc - n_c * d_ab) / (n_a + n_b + n_c)
                }
            };
            dist[[a, c]] = updated;
            dist[[c, a]] = updated;
        }

        merges.push(Merge {
            left: node[a],
            right: node[b],
            height: if ward { d_ab.max(0.0).sqrt() } else { d_ab },
            size: size[a] + size[b],
        });
        size[a] += size[b];
        node[a] = n + step;
        active[b] = false;

        for i in 0..n {
            if !active[i] {
                continue;
            }
            if i == a || nn[i] == a || nn[i] == b {
                (nn[i], nn_dist[i]) = nearest(&dist, &active, i);
            } else if i < a && (dist[[i, a]] < nn_dist[i] || (dist[[i, a]] == nn_dist[i] && a < nn[i])) {
                nn[i] = a;
                nn_dist[i] = dist[[i, a]];
            }
        }
    }

    let order = leaf_order(&merges, n);
    Ok(Dendrogram { merges, order })
}

/// Depth-first, left before right
fn leaf_order(merges: &[Merge], n: usize) -> Vec<usize> {
    if merges.is_empty() {
        return (0..n).collect();
    }
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![n + merges.len() - 1];
    while let Some(id) = stack.pop() {
        if id < n {
            order.push(id);
        } else {
            let m = &merges[id - n];
            stack.push(m.right);
            stack.push(m.left);
        }
    }
    order
}

/// Pairwise Euclidean distances between the rows of `data`
pub fn euclidean_distances(data: &Array2<f64>) -> Array2<f64> {
    use rayon::prelude::*;

    let n = data.nrows();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| {
                    data.row(i)
                        .iter()
                        .zip(data.row(j).iter())
                        .map(|(x, y)| (x - y).powi(2))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect()
        })
        .collect();
    let mut out = Array2::zeros((n, n));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, d) in row.into_iter().enumerate() {
            out[[i, j]] = d;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn points() -> Array2<f64> {
        array![[0.0, 0.0], [10.0, 10.0], [0.5, 0.0], [10.0, 11.0], [0.0, 1.0]]
    }

    #[test]
    fn test_two_groups_are_contiguous() {
        let d = euclidean_distances(&points());
        for method in [
            LinkageMethod::WardD2,
            LinkageMethod::Complete,
            LinkageMethod::Average,
            LinkageMethod::Single,
        ] {
            let tree = hclust(&d, method).unwrap();
            assert_eq!(tree.merges.len(), 4);
            assert_eq!(tree.order, vec![0, 2, 4, 1, 3], "{}", method);
        }
    }

    #[test]
    fn test_single_linkage_heights() {
        let d = euclidean_distances(&points());
        let tree = hclust(&d, LinkageMethod::Single).unwrap();
        assert_eq!(tree.merges[0].height, 0.5);
        assert_eq!((tree.merges[0].left, tree.merges[0].right), (0, 2));
        assert!(tree.merges.windows(2).all(|w| w[0].height <= w[1].height));
    }

    #[test]
    fn test_ward_heights_on_collinear_points() {
        // ward.D2 merge height for two singletons is their distance
        let d = euclidean_distances(&array![[0.0], [1.0], [5.0]]);
        let tree = hclust(&d, LinkageMethod::WardD2).unwrap();
        assert!((tree.merges[0].height - 1.0).abs() < 1e-12);
        // singleton {5} joins {0, 1}: sqrt(2 * 1 * 2 / 3 * 4.5^2)
        let expected = (2.0 * 2.0 / 3.0 * 4.5_f64.powi(2)).sqrt();
        assert!((tree.merges[1].height - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ties_resolved_by_index() {
        let d = euclidean_distances(&array![[0.0], [1.0], [2.0], [3.0]]);
        let a = hclust(&d, LinkageMethod::Average).unwrap();
        let b = hclust(&d, LinkageMethod::Average).unwrap();
        assert_eq!(a.order, b.order);
        assert_eq!((a.merges[0].left, a.merges[0].right), (0, 1));
        assert_eq!(a.order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("ward.D2".parse::<LinkageMethod>().unwrap(), LinkageMethod::WardD2);
        assert_eq!("UPGMA".parse::<LinkageMethod>().unwrap(), LinkageMethod::Average);
        assert!("centroid".parse::<LinkageMethod>().is_err());
    }
}
