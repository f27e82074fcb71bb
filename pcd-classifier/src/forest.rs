use bitcode::{Decode, Encode};
use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use rayon::{
    iter::{IntoParallelRefIterator as _, ParallelIterator as _},
    slice::ParallelSlice as _,
};

use pcd_core::{
    classes::{observed_labels, ClassLabel},
    pointcloud::normalize::NormalizedFeatureMatrix,
    Error, Result,
};

use crate::{
    classifier::{argmax, check_training_shape, Classifier},
    tree::{DecisionTree, MaxFeatures, TreeParams},
};

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct ForestParams {
    pub n_trees: u32,
    pub tree: TreeParams,
    pub bootstrap: bool,
    /// Fixed seed for reproducible training; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            tree: TreeParams::default(),
            bootstrap: true,
            seed: None,
        }
    }
}

impl ForestParams {
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.tree.max_features = max_features;
        self
    }
}

/// Bagged decision trees with a majority vote.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct RandomForest {
    params: ForestParams,
    columns: Vec<String>,
    classes: Vec<ClassLabel>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            columns: Vec::new(),
            classes: Vec::new(),
            trees: Vec::new(),
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn check_structure(&self) -> Result<()> {
        if self.columns.is_empty() || self.classes.is_empty() {
            return Err(Error::Model("random forest has no columns or classes".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.check_structure(self.columns.len(), self.classes.len())
                .map_err(|e| match e {
                    Error::Model(message) => Error::Model(format!("tree {i}: {message}")),
                    other => other,
                })?;
        }
        Ok(())
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, features: &NormalizedFeatureMatrix, labels: &[ClassLabel]) -> Result<()> {
        check_training_shape(features, labels)?;
        if self.params.n_trees == 0 {
            return Err(Error::Config("a forest needs at least one tree".into()));
        }

        let classes = observed_labels(&[labels]);
        let targets: Vec<u32> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default() as u32)
            .collect();

        let mut master = match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // one seed per tree, so the result does not depend on thread scheduling
        let tree_seeds: Vec<u64> = (0..self.params.n_trees).map(|_| master.gen()).collect();

        let n_rows = features.n_rows();
        let matrix = &**features;
        let params = self.params;
        let trees: Vec<DecisionTree> = tree_seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let samples: Vec<usize> = if params.bootstrap {
                    (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect()
                } else {
                    (0..n_rows).collect()
                };
                DecisionTree::fit(matrix, &targets, classes.len(), samples, &params.tree, &mut rng)
            })
            .collect();

        log::debug!(
            "fitted {} trees on {} rows, {} classes, mean {:.0} nodes",
            trees.len(),
            n_rows,
            classes.len(),
            trees.iter().map(|t| t.node_count()).sum::<usize>() as f64 / trees.len() as f64
        );

        self.columns = features.columns().to_vec();
        self.classes = classes;
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, features: &NormalizedFeatureMatrix) -> Result<Vec<ClassLabel>> {
        if !self.is_fitted() {
            return Err(Error::Model("random forest is not fitted".into()));
        }
        features.ensure_columns(&self.columns)?;
        if features.n_rows() == 0 {
            return Ok(Vec::new());
        }

        let n_classes = self.classes.len();
        let predictions = features
            .values()
            .par_chunks_exact(features.n_cols())
            .map(|row| {
                let mut votes = vec![0u32; n_classes];
                for tree in &self.trees {
                    votes[tree.predict_row(row) as usize] += 1;
                }
                self.classes[argmax(&votes)]
            })
            .collect();
        Ok(predictions)
    }
}
