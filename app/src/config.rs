use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use pcd_classifier::{
    forest::{ForestParams, RandomForest},
    knn::KNearestNeighbors,
    mlp::{MlpParams, MultiLayerPerceptron},
    tree::{MaxFeatures, TreeParams},
    Estimator,
};
use pcd_core::{
    classes::{ClassScheme, LabelRemap},
    pointcloud::table::CLASSIFICATION_COLUMN,
    Error,
};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    #[default]
    Forest,
    Knn,
    Mlp,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 3] =
        [EstimatorKind::Forest, EstimatorKind::Knn, EstimatorKind::Mlp];
}

/// Settings of the `train` and `compare` commands. Every key is optional in
/// the JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub train_path: PathBuf,
    pub validation_path: Option<PathBuf>,
    pub unlabeled_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub model_path: PathBuf,

    pub label_column: String,
    /// Source code to class code, applied to the training labels.
    pub label_remap: BTreeMap<i32, i32>,
    /// Class code for source codes missing from `label_remap`.
    pub unmapped_label: Option<i32>,
    /// Names and colours used in reports; defaults to the land cover classes.
    pub classes: Option<ClassScheme>,

    pub validation_sample_fraction: f64,
    pub test_fraction: f64,
    pub seed: Option<u64>,

    pub model: EstimatorKind,
    pub n_trees: u32,
    pub max_depth: Option<u32>,
    pub min_samples_split: u32,
    pub max_features: MaxFeatures,
    pub n_neighbors: u32,
    pub hidden_units: u32,
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("data/3DML_urban_point_cloud.xyz"),
            validation_path: None,
            unlabeled_path: None,
            output_path: PathBuf::from("data/classified_RF.xyz"),
            model_path: PathBuf::from("models/model_trained.bin"),
            label_column: CLASSIFICATION_COLUMN.to_string(),
            label_remap: BTreeMap::new(),
            unmapped_label: None,
            classes: None,
            validation_sample_fraction: 0.1,
            test_fraction: 0.4,
            seed: None,
            model: EstimatorKind::Forest,
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            max_features: MaxFeatures::Sqrt,
            n_neighbors: 5,
            hidden_units: 100,
            epochs: 300,
            batch_size: 200,
            learning_rate: 0.001,
        }
    }
}

fn check_fraction(name: &str, value: f64) -> pcd_core::Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must lie in (0, 1), got {value}")))
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| AppError::ConfigFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> pcd_core::Result<()> {
        check_fraction("validation_sample_fraction", self.validation_sample_fraction)?;
        check_fraction("test_fraction", self.test_fraction)?;
        if self.n_trees == 0 {
            return Err(Error::Config("n_trees must be at least 1".into()));
        }
        if self.n_neighbors == 0 {
            return Err(Error::Config("n_neighbors must be at least 1".into()));
        }
        if self.hidden_units == 0 || self.epochs == 0 || self.batch_size == 0 {
            return Err(Error::Config(
                "hidden_units, epochs and batch_size must be at least 1".into(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.label_column.is_empty() {
            return Err(Error::Config("label_column must not be empty".into()));
        }
        Ok(())
    }

    pub fn label_remap(&self) -> LabelRemap {
        LabelRemap {
            mapping: self.label_remap.clone(),
            unmapped: self.unmapped_label,
        }
    }

    pub fn class_scheme(&self) -> ClassScheme {
        self.classes
            .clone()
            .unwrap_or_else(ClassScheme::land_cover_with_others)
    }

    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            tree: TreeParams {
                max_depth: self.max_depth,
                min_samples_split: self.min_samples_split,
                max_features: self.max_features,
            },
            bootstrap: true,
            seed: self.seed,
        }
    }

    pub fn mlp_params(&self) -> MlpParams {
        MlpParams {
            hidden_units: self.hidden_units,
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            seed: self.seed,
            ..Default::default()
        }
    }

    /// Unfitted estimator of the given kind with the configured parameters.
    pub fn estimator(&self, kind: EstimatorKind) -> Estimator {
        match kind {
            EstimatorKind::Forest => Estimator::RandomForest(RandomForest::new(self.forest_params())),
            EstimatorKind::Knn => {
                Estimator::KNearestNeighbors(KNearestNeighbors::new(self.n_neighbors))
            }
            EstimatorKind::Mlp => Estimator::MultiLayerPerceptron(MultiLayerPerceptron::new(
                self.mlp_params(),
            )),
        }
    }
}
