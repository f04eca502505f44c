//! Histogram-binned regression trees
//!
//! Features are quantized once per fit into at most `max_bins` bins. Bin 0
//! holds missing values, bins `1..` hold values in increasing order, and a
//! value `v` lands in bin `1 + #{cut < v}`. A split "bin <= b" sends missing
//! values left and is stored as a plain threshold so prediction works on raw
//! feature rows.

use crate::features::FeatureMatrix;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

/// Per-feature cut points learned from a training matrix
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBinner {
    cuts: Vec<Vec<f64>>,
}

impl FeatureBinner {
    /// Learn cut points for every column of `x`
    pub fn fit(x: &FeatureMatrix, max_bins: usize) -> Self {
        // bin 0 is reserved for missing values; indices are stored as u16
        let value_bins = max_bins.clamp(2, u16::MAX as usize) - 1;
        let cuts = (0..x.n_cols())
            .map(|j| {
                let mut values: Vec<f64> = x.rows().iter().map(|r| r[j]).filter(|v| v.is_finite()).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                column_cuts(&values, value_bins)
            })
            .collect();
        Self { cuts }
    }

    pub fn n_features(&self) -> usize {
        self.cuts.len()
    }

    /// Total bins for a feature, including the missing bin
    pub fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 2
    }

    pub fn bin(&self, feature: usize, value: f64) -> u16 {
        if value.is_nan() {
            return 0;
        }
        let cuts = &self.cuts[feature];
        (1 + cuts.partition_point(|&c| c < value)) as u16
    }

    /// Threshold equivalent to the split "bin <= b"
    pub fn threshold(&self, feature: usize, bin: usize) -> Option<f64> {
        if bin == 0 {
            None
        } else {
            Some(self.cuts[feature][bin - 1])
        }
    }

    /// Column-major binned copy of `x`
    pub fn transform(&self, x: &FeatureMatrix) -> BinnedMatrix {
        let columns = (0..self.cuts.len())
            .map(|j| x.rows().iter().map(|r| self.bin(j, r[j])).collect())
            .collect();
        BinnedMatrix {
            columns,
            n_rows: x.n_rows(),
        }
    }
}

fn column_cuts(sorted: &[f64], value_bins: usize) -> Vec<f64> {
    let mut unique: Vec<f64> = sorted.to_vec();
    unique.dedup();
    if unique.len() <= 1 {
        return Vec::new();
    }
    if unique.len() <= value_bins {
        // one bin per distinct value
        unique.pop();
        return unique;
    }

    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..value_bins)
        .map(|k| sorted[(k * n / value_bins).min(n - 1)])
        .collect();
    cuts.dedup();
    // the maximum as a cut would leave the top bin empty
    if cuts.last() == sorted.last() {
        cuts.pop();
    }
    cuts
}

/// Binned feature values, column-major
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    columns: Vec<Vec<u16>>,
    n_rows: usize,
}

impl BinnedMatrix {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }
}

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features sampled per node; all features when `None`
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        /// Go left when the value is missing or `<=` the threshold
        threshold: Option<f64>,
        left: usize,
        right: usize,
    },
}

/// Fitted regression tree stored as a node arena; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

/// Rows that ended up in each leaf of a freshly grown tree
#[derive(Debug, Clone)]
pub struct LeafAssignment {
    pub node: usize,
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl RegressionTree {
    /// Grow a squared-error tree on `targets` over the given rows.
    ///
    /// `rows` may contain duplicates (bootstrap samples). Split gains are
    /// added to `importances`. Leaves hold the mean target of their rows.
    pub fn grow(
        binned: &BinnedMatrix,
        binner: &FeatureBinner,
        targets: &[f64],
        rows: Vec<usize>,
        params: &TreeParams,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> (Self, Vec<LeafAssignment>) {
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut leaves = Vec::new();
        let mut stack = vec![(0usize, rows, 0usize)];

        while let Some((node, rows, depth)) = stack.pop() {
            let value = mean_of(targets, &rows);
            let splittable = depth < params.max_depth && rows.len() >= 2 * params.min_samples_leaf.max(1);
            let best = if splittable {
                best_split(binned, binner, targets, &rows, params, rng)
            } else {
                None
            };

            let Some(best) = best else {
                nodes[node] = Node::Leaf { value };
                leaves.push(LeafAssignment { node, rows });
                continue;
            };

            importances[best.feature] += best.gain;
            let column = &binned.columns[best.feature];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                rows.into_iter().partition(|&r| column[r] as usize <= best.bin);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { value: 0.0 });
            nodes.push(Node::Leaf { value: 0.0 });
            nodes[node] = Node::Split {
                feature: best.feature,
                threshold: binner.threshold(best.feature, best.bin),
                left,
                right,
            };
            stack.push((right, right_rows, depth + 1));
            stack.push((left, left_rows, depth + 1));
        }

        (Self { nodes }, leaves)
    }

    /// Overwrite the value of a leaf node
    pub fn set_leaf_value(&mut self, node: usize, value: f64) {
        if let Some(Node::Leaf { value: v }) = self.nodes.get_mut(node) {
            *v = value;
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(f64::NAN);
                    let go_left = v.is_nan() || threshold.map_or(false, |t| v <= t);
                    idx = if go_left { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

fn mean_of(targets: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64
}

fn best_split(
    binned: &BinnedMatrix,
    binner: &FeatureBinner,
    targets: &[f64],
    rows: &[usize],
    params: &TreeParams,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let n_features = binned.n_features();
    let candidates: Vec<usize> = match params.max_features {
        Some(k) if k < n_features => sample(rng, n_features, k.max(1)).into_vec(),
        _ => (0..n_features).collect(),
    };

    let n = rows.len() as f64;
    let total: f64 = rows.iter().map(|&r| targets[r]).sum();
    let parent_score = total * total / n;
    let min_leaf = params.min_samples_leaf.max(1);

    let mut best: Option<BestSplit> = None;
    let mut sums = Vec::new();
    let mut counts = Vec::new();
    for feature in candidates {
        let n_bins = binner.n_bins(feature);
        sums.clear();
        sums.resize(n_bins, 0.0);
        counts.clear();
        counts.resize(n_bins, 0usize);
        let column = &binned.columns[feature];
        for &r in rows {
            let b = column[r] as usize;
            sums[b] += targets[r];
            counts[b] += 1;
        }

        let mut left_sum = 0.0;
        let mut left_count = 0usize;
        for bin in 0..n_bins - 1 {
            left_sum += sums[bin];
            left_count += counts[bin];
            let right_count = rows.len() - left_count;
            if left_count < min_leaf {
                continue;
            }
            if right_count < min_leaf {
                break;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_count as f64
                + right_sum * right_sum / right_count as f64
                - parent_score;
            if gain > 1e-12 && best.map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit { feature, bin, gain });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn matrix(values: &[f64]) -> FeatureMatrix {
        FeatureMatrix::new(
            vec!["x".to_string()],
            values.iter().map(|&v| vec![v]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_binning_puts_missing_in_bin_zero() {
        let x = matrix(&[1.0, 2.0, f64::NAN, 3.0]);
        let binner = FeatureBinner::fit(&x, 64);
        assert_eq!(binner.bin(0, f64::NAN), 0);
        assert_eq!(binner.bin(0, 1.0), 1);
        assert_eq!(binner.bin(0, 2.0), 2);
        assert_eq!(binner.bin(0, 3.0), 3);
        assert_eq!(binner.n_bins(0), 4);
    }

    #[test]
    fn test_oversized_bin_count_is_capped() {
        let values: Vec<f64> = (0..70_000).map(f64::from).collect();
        let binner = FeatureBinner::fit(&matrix(&values), 100_000);
        let top = binner.n_bins(0) - 1;
        assert!(top <= u16::MAX as usize);
        assert_eq!(binner.bin(0, 69_999.0) as usize, top);
        assert!(binner.bin(0, 50_000.0) > binner.bin(0, 10_000.0));
    }

    #[test]
    fn test_threshold_matches_bins() {
        let values: Vec<f64> = (0..500).map(|i| i as f64 * 0.37).collect();
        let x = matrix(&values);
        let binner = FeatureBinner::fit(&x, 16);
        for b in 1..binner.n_bins(0) - 1 {
            let t = binner.threshold(0, b).unwrap();
            for &v in &values {
                assert_eq!(binner.bin(0, v) as usize <= b, v <= t);
            }
        }
    }

    #[test]
    fn test_tree_learns_step_function() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let targets: Vec<f64> = values.iter().map(|&v| if v < 50.0 { 10.0 } else { 30.0 }).collect();
        let x = matrix(&values);
        let binner = FeatureBinner::fit(&x, 64);
        let binned = binner.transform(&x);
        let params = TreeParams {
            max_depth: 3,
            min_samples_leaf: 1,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut importances = vec![0.0];
        let (tree, leaves) = RegressionTree::grow(
            &binned,
            &binner,
            &targets,
            (0..100).collect(),
            &params,
            &mut rng,
            &mut importances,
        );
        assert!((tree.predict_row(&[10.0]) - 10.0).abs() < 1e-9);
        assert!((tree.predict_row(&[90.0]) - 30.0).abs() < 1e-9);
        assert!(importances[0] > 0.0);
        assert_eq!(leaves.iter().map(|l| l.rows.len()).sum::<usize>(), 100);
    }

    #[test]
    fn test_missing_values_go_left() {
        let values: Vec<f64> = (0..40).map(|i| if i < 20 { f64::NAN } else { i as f64 }).collect();
        let targets: Vec<f64> = (0..40).map(|i| if i < 20 { -5.0 } else { 5.0 }).collect();
        let x = matrix(&values);
        let binner = FeatureBinner::fit(&x, 64);
        let binned = binner.transform(&x);
        let params = TreeParams {
            max_depth: 1,
            min_samples_leaf: 1,
            max_features: None,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let mut importances = vec![0.0];
        let (tree, _) = RegressionTree::grow(
            &binned,
            &binner,
            &targets,
            (0..40).collect(),
            &params,
            &mut rng,
            &mut importances,
        );
        assert!((tree.predict_row(&[f64::NAN]) + 5.0).abs() < 1e-9);
        assert!((tree.predict_row(&[25.0]) - 5.0).abs() < 1e-9);
    }
}
