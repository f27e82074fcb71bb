//! CART decision tree with Gini impurity, the building block of the forest.

use bitcode::{Decode, Encode};
use rand::{seq::SliceRandom as _, Rng};
use serde::{Deserialize, Serialize};

use pcd_core::{pointcloud::feature::FeatureMatrix, Error, Result};

use crate::classifier::argmax;

/// Number of features examined when searching a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    #[default]
    Sqrt,
    Log2,
    All,
    Count(u32),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(c) => c as usize,
        };
        n.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct TreeParams {
    pub max_depth: Option<u32>,
    pub min_samples_split: u32,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            max_features: MaxFeatures::Sqrt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
enum Node {
    Split {
        feature: u32,
        threshold: f64,
        left: u32,
        right: u32,
    },
    Leaf {
        class: u32,
    },
}

/// Nodes are stored flat; node 0 is the root. Leaves hold an index into the
/// class list of the owning estimator.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct Pending {
    node: usize,
    samples: Vec<usize>,
    depth: u32,
}

struct Split {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `samples` (duplicates allowed, as
    /// produced by bootstrapping). `targets[i]` is the class index of row `i`.
    pub fn fit<R: Rng + ?Sized>(
        features: &FeatureMatrix,
        targets: &[u32],
        n_classes: usize,
        samples: Vec<usize>,
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut nodes = vec![Node::Leaf { class: 0 }];
        let mut stack = vec![Pending {
            node: 0,
            samples,
            depth: 0,
        }];

        while let Some(pending) = stack.pop() {
            let counts = class_counts(targets, &pending.samples, n_classes);
            let is_pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
            let depth_reached = params.max_depth.is_some_and(|d| pending.depth >= d);
            let too_small = (pending.samples.len() as u32) < params.min_samples_split.max(2);

            let split = if is_pure || depth_reached || too_small {
                None
            } else {
                best_split(features, targets, n_classes, &pending.samples, params, rng)
            };

            match split {
                None => {
                    nodes[pending.node] = Node::Leaf {
                        class: argmax(&counts) as u32,
                    };
                }
                Some(split) => {
                    let (left, right): (Vec<usize>, Vec<usize>) = pending
                        .samples
                        .iter()
                        .partition(|&&i| features.row(i)[split.feature] <= split.threshold);

                    let left_node = nodes.len();
                    nodes.push(Node::Leaf { class: 0 });
                    nodes.push(Node::Leaf { class: 0 });
                    nodes[pending.node] = Node::Split {
                        feature: split.feature as u32,
                        threshold: split.threshold,
                        left: left_node as u32,
                        right: left_node as u32 + 1,
                    };

                    stack.push(Pending {
                        node: left_node + 1,
                        samples: right,
                        depth: pending.depth + 1,
                    });
                    stack.push(Pending {
                        node: left_node,
                        samples: left,
                        depth: pending.depth + 1,
                    });
                }
            }
        }

        Self { nodes }
    }

    pub fn predict_row(&self, row: &[f64]) -> u32 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { class } => return *class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature as usize] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
            }
        }
    }

    /// Checks a decoded tree before it is used for prediction: the tree is not
    /// empty, split features and leaf classes are in range, and every child
    /// comes after its parent so a walk from the root always ends at a leaf.
    pub fn check_structure(&self, n_features: usize, n_classes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Model("decision tree has no nodes".into()));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf { class } => {
                    if class as usize >= n_classes {
                        return Err(Error::Model(format!(
                            "leaf {index} predicts class index {class}, only {n_classes} classes"
                        )));
                    }
                }
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if feature as usize >= n_features {
                        return Err(Error::Model(format!(
                            "node {index} splits on feature {feature}, only {n_features} features"
                        )));
                    }
                    for child in [left, right] {
                        let child = child as usize;
                        if child <= index || child >= self.nodes.len() {
                            return Err(Error::Model(format!(
                                "node {index} has invalid child {child}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => {
                    1 + walk(nodes, *left as usize).max(walk(nodes, *right as usize))
                }
            }
        }
        walk(&self.nodes, 0)
    }
}

fn class_counts(targets: &[u32], samples: &[usize], n_classes: usize) -> Vec<u32> {
    let mut counts = vec![0u32; n_classes];
    for &i in samples {
        counts[targets[i] as usize] += 1;
    }
    counts
}

fn gini(counts: &[u32], total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// Lowest weighted Gini over `max_features` randomly drawn features. Features
/// that are constant on this node do not count towards `max_features`.
fn best_split<R: Rng + ?Sized>(
    features: &FeatureMatrix,
    targets: &[u32],
    n_classes: usize,
    samples: &[usize],
    params: &TreeParams,
    rng: &mut R,
) -> Option<Split> {
    let n_features = features.n_cols();
    let wanted = params.max_features.resolve(n_features);

    let mut candidates: Vec<usize> = (0..n_features).collect();
    candidates.shuffle(rng);

    let total = samples.len() as u32;
    let total_counts = class_counts(targets, samples, n_classes);
    let mut best: Option<Split> = None;
    let mut examined = 0;

    let mut sorted: Vec<(f64, u32)> = Vec::with_capacity(samples.len());
    for feature in candidates {
        if examined >= wanted {
            break;
        }

        sorted.clear();
        sorted.extend(
            samples
                .iter()
                .map(|&i| (features.row(i)[feature], targets[i])),
        );
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        if sorted[0].0 == sorted[sorted.len() - 1].0 {
            continue;
        }
        examined += 1;

        let mut left_counts = vec![0u32; n_classes];
        let mut right_counts = total_counts.clone();
        for k in 0..sorted.len() - 1 {
            let class = sorted[k].1 as usize;
            left_counts[class] += 1;
            right_counts[class] -= 1;

            let (value, next) = (sorted[k].0, sorted[k + 1].0);
            if value == next {
                continue;
            }

            let n_left = k as u32 + 1;
            let n_right = total - n_left;
            let impurity = (n_left as f64 * gini(&left_counts, n_left)
                + n_right as f64 * gini(&right_counts, n_right))
                / total as f64;

            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                let mut threshold = value + (next - value) / 2.0;
                // midpoint can round up to `next` for adjacent floats
                if threshold >= next {
                    threshold = value;
                }
                best = Some(Split {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::*;

    fn matrix(rows: &[Vec<f64>]) -> FeatureMatrix {
        let columns = (0..rows[0].len()).map(|j| format!("f{j}")).collect();
        FeatureMatrix::from_rows(columns, rows).unwrap()
    }

    #[test]
    fn separates_a_threshold() {
        let features = matrix(&[
            vec![0.1, 5.0],
            vec![0.2, 5.0],
            vec![0.3, 5.0],
            vec![0.7, 5.0],
            vec![0.8, 5.0],
            vec![0.9, 5.0],
        ]);
        let targets = [0, 0, 0, 1, 1, 1];
        let params = TreeParams {
            max_features: MaxFeatures::All,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(&features, &targets, 2, (0..6).collect(), &params, &mut rng);

        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict_row(&[0.0, 5.0]), 0);
        assert_eq!(tree.predict_row(&[0.4, 5.0]), 0);
        assert_eq!(tree.predict_row(&[0.6, 5.0]), 1);
        assert_eq!(tree.predict_row(&[1.0, 5.0]), 1);
    }

    #[test]
    fn constant_feature_is_skipped_even_when_drawn() {
        // one informative feature among constant ones, only one drawn per node
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![1.0, 1.0, i as f64, 1.0])
            .collect();
        let targets: Vec<u32> = (0..20).map(|i| u32::from(i >= 10)).collect();
        let params = TreeParams {
            max_features: MaxFeatures::Count(1),
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let tree = DecisionTree::fit(
            &matrix(&rows),
            &targets,
            2,
            (0..20).collect(),
            &params,
            &mut rng,
        );
        assert_eq!(tree.predict_row(&[1.0, 1.0, 3.0, 1.0]), 0);
        assert_eq!(tree.predict_row(&[1.0, 1.0, 15.0, 1.0]), 1);
    }

    #[test]
    fn max_depth_limits_growth() {
        let rows: Vec<Vec<f64>> = (0..16).map(|i| vec![i as f64]).collect();
        let targets: Vec<u32> = (0..16).map(|i| (i % 2) as u32).collect();
        let params = TreeParams {
            max_depth: Some(2),
            max_features: MaxFeatures::All,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = DecisionTree::fit(
            &matrix(&rows),
            &targets,
            2,
            (0..16).collect(),
            &params,
            &mut rng,
        );
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn unsplittable_node_is_majority_leaf() {
        let features = matrix(&[vec![1.0], vec![1.0], vec![1.0]]);
        let targets = [2, 1, 2];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = DecisionTree::fit(
            &features,
            &targets,
            3,
            vec![0, 1, 2],
            &TreeParams::default(),
            &mut rng,
        );
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict_row(&[1.0]), 2);
    }

    #[test]
    fn fitted_tree_passes_structure_check() {
        let rows: Vec<Vec<f64>> = (0..16).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let targets: Vec<u32> = (0..16).map(|i| (i % 3) as u32).collect();
        let mut rng = StdRng::seed_from_u64(4);
        let tree = DecisionTree::fit(
            &matrix(&rows),
            &targets,
            3,
            (0..16).collect(),
            &TreeParams::default(),
            &mut rng,
        );
        assert!(tree.node_count() > 1);
        tree.check_structure(2, 3).unwrap();
    }

    #[test]
    fn malformed_trees_fail_structure_check() {
        let split = |feature, left, right| Node::Split {
            feature,
            threshold: 0.5,
            left,
            right,
        };
        let leaf = |class| Node::Leaf { class };
        let cases = [
            vec![],
            // child pointing back at the root
            vec![split(0, 0, 2), leaf(0), leaf(1)],
            vec![split(0, 1, 3), leaf(0), leaf(1)],
            vec![split(5, 1, 2), leaf(0), leaf(1)],
            vec![split(0, 1, 2), leaf(0), leaf(9)],
        ];
        for nodes in cases {
            let tree = DecisionTree { nodes };
            assert!(matches!(tree.check_structure(2, 2), Err(Error::Model(_))));
        }

        let tree = DecisionTree {
            nodes: vec![split(1, 1, 2), leaf(0), leaf(1)],
        };
        tree.check_structure(2, 2).unwrap();
        assert_eq!(tree.predict_row(&[0.0, 0.9]), 1);
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(10), 3);
        assert_eq!(MaxFeatures::Log2.resolve(10), 3);
        assert_eq!(MaxFeatures::All.resolve(10), 10);
        assert_eq!(MaxFeatures::Count(50).resolve(10), 10);
        assert_eq!(MaxFeatures::Count(0).resolve(10), 1);
    }
}
