//! Random forest of CART trees for binary classification
//!
//! Trees split on Gini impurity over bootstrap samples, drawing a random
//! subset of candidate features at each node. Leaves store the fraction of
//! positive samples that reached them, and the forest probability is the
//! mean leaf value across trees.

use crate::models::NUM_FEATURES;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Hyperparameters for the forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Candidate features evaluated per split
    pub max_features: usize,
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            // ceil(sqrt(9))
            max_features: 3,
            bootstrap: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Single classification tree; node 0 is the root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity_decrease: f64,
}

struct TreeBuilder<'a> {
    x: &'a [[f64; NUM_FEATURES]],
    y: &'a [bool],
    params: &'a ForestParams,
    nodes: Vec<Node>,
    importances: [f64; NUM_FEATURES],
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

impl<'a> TreeBuilder<'a> {
    fn grow(&mut self, indices: &[usize], depth: usize, rng: &mut StdRng) -> usize {
        let n = indices.len();
        let positives = indices.iter().filter(|&&i| self.y[i]).count();
        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: if n == 0 { 0.0 } else { positives as f64 / n as f64 },
        });

        let impurity = gini(positives, n);
        if depth >= self.params.max_depth
            || n < self.params.min_samples_split
            || impurity <= 0.0
        {
            return node_id;
        }

        let Some(best) = self.best_split(indices, positives, impurity, rng) else {
            return node_id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[i][best.feature] <= best.threshold);

        self.importances[best.feature] += best.impurity_decrease;

        let left = self.grow(&left_idx, depth + 1, rng);
        let right = self.grow(&right_idx, depth + 1, rng);
        self.nodes[node_id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node_id
    }

    /// Search features in random order until `max_features` non-constant
    /// ones have been evaluated and a valid split exists
    fn best_split(
        &self,
        indices: &[usize],
        positives: usize,
        impurity: f64,
        rng: &mut StdRng,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let mut order: Vec<usize> = (0..NUM_FEATURES).collect();
        order.shuffle(rng);

        let mut best: Option<SplitCandidate> = None;
        let mut evaluated = 0;
        let mut sorted: Vec<usize> = indices.to_vec();

        for feature in order {
            if evaluated >= self.params.max_features && best.is_some() {
                break;
            }

            sorted.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let first = self.x[sorted[0]][feature];
            let last = self.x[sorted[n - 1]][feature];
            if last - first <= f64::EPSILON {
                continue;
            }
            evaluated += 1;

            let mut left_pos = 0;
            for k in 0..n - 1 {
                if self.y[sorted[k]] {
                    left_pos += 1;
                }
                let here = self.x[sorted[k]][feature];
                let next = self.x[sorted[k + 1]][feature];
                if next - here <= f64::EPSILON {
                    continue;
                }

                let left_n = k + 1;
                let right_n = n - left_n;
                let weighted = (left_n as f64 * gini(left_pos, left_n)
                    + right_n as f64 * gini(positives - left_pos, right_n))
                    / n as f64;
                let decrease = (impurity - weighted) * n as f64;

                if best
                    .as_ref()
                    .map_or(true, |b| decrease > b.impurity_decrease)
                {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        impurity_decrease: decrease,
                    });
                }
            }
        }

        best
    }
}

impl DecisionTree {
    fn fit(
        x: &[[f64; NUM_FEATURES]],
        y: &[bool],
        indices: &[usize],
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> (Self, [f64; NUM_FEATURES]) {
        let mut builder = TreeBuilder {
            x,
            y,
            params,
            nodes: Vec::new(),
            importances: [0.0; NUM_FEATURES],
        };
        builder.grow(indices, 0, rng);
        (
            Self {
                nodes: builder.nodes,
            },
            builder.importances,
        )
    }

    /// Positive fraction of the leaf the sample falls into
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Bagged ensemble of decision trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    importances: [f64; NUM_FEATURES],
}

impl RandomForest {
    /// Fit on feature rows `x` and labels `y` (same length, non-empty)
    pub fn fit(
        x: &[[f64; NUM_FEATURES]],
        y: &[bool],
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> Self {
        let n = x.len().min(y.len());
        let mut trees = Vec::with_capacity(params.n_trees);
        let mut total = [0.0; NUM_FEATURES];

        if n == 0 {
            return Self {
                trees,
                importances: [1.0 / NUM_FEATURES as f64; NUM_FEATURES],
            };
        }

        for _ in 0..params.n_trees.max(1) {
            let indices: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let (tree, imp) = DecisionTree::fit(x, y, &indices, params, rng);
            let sum: f64 = imp.iter().sum();
            if sum > 0.0 {
                for (t, v) in total.iter_mut().zip(imp.iter()) {
                    *t += v / sum;
                }
            }
            trees.push(tree);
        }

        Self {
            trees,
            importances: normalize(total),
        }
    }

    /// Mean positive probability across trees
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    /// Normalized mean impurity decrease per feature
    pub fn feature_importances(&self) -> &[f64; NUM_FEATURES] {
        &self.importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(|t| t.depth()).max().unwrap_or(0)
    }
}

fn normalize(values: [f64; NUM_FEATURES]) -> [f64; NUM_FEATURES] {
    let sum: f64 = values.iter().sum();
    if sum > 0.0 {
        values.map(|v| v / sum)
    } else {
        [1.0 / NUM_FEATURES as f64; NUM_FEATURES]
    }
}
