//! Trained estimators and their on-disk artifact.
//!
//! The artifact is a magic tag followed by a bitcode-encoded body that records
//! the format version and the feature columns the estimator was fit on, so a
//! model trained on a different feature set is refused at load time rather
//! than producing silent garbage.

use std::{fs, path::Path};

use bitcode::{Decode, Encode};

use pcd_core::{
    classes::ClassLabel,
    pointcloud::{feature::FEATURE_COLUMNS, normalize::NormalizedFeatureMatrix},
    Error, Result,
};

use crate::{
    classifier::Classifier, forest::RandomForest, knn::KNearestNeighbors,
    mlp::MultiLayerPerceptron,
};

pub const MODEL_FORMAT_VERSION: u32 = 1;
const MAGIC: &[u8; 4] = b"PCLM";

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Estimator {
    RandomForest(RandomForest),
    KNearestNeighbors(KNearestNeighbors),
    MultiLayerPerceptron(MultiLayerPerceptron),
}

impl Estimator {
    pub fn name(&self) -> &'static str {
        match self {
            Estimator::RandomForest(_) => "random_forest",
            Estimator::KNearestNeighbors(_) => "k_nearest_neighbors",
            Estimator::MultiLayerPerceptron(_) => "multi_layer_perceptron",
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Estimator::RandomForest(forest) => forest.is_fitted(),
            Estimator::KNearestNeighbors(knn) => knn.is_fitted(),
            Estimator::MultiLayerPerceptron(mlp) => mlp.is_fitted(),
        }
    }

    /// Internal consistency of a decoded estimator; see
    /// [`DecisionTree::check_structure`](crate::tree::DecisionTree::check_structure).
    pub fn check_structure(&self) -> Result<()> {
        match self {
            Estimator::RandomForest(forest) => forest.check_structure(),
            Estimator::KNearestNeighbors(knn) => knn.check_structure(),
            Estimator::MultiLayerPerceptron(mlp) => mlp.check_structure(),
        }
    }

    fn columns(&self) -> &[String] {
        match self {
            Estimator::RandomForest(forest) => forest.columns(),
            Estimator::KNearestNeighbors(knn) => knn.columns(),
            Estimator::MultiLayerPerceptron(mlp) => mlp.columns(),
        }
    }

    fn classes(&self) -> Vec<ClassLabel> {
        match self {
            Estimator::RandomForest(forest) => forest.classes().to_vec(),
            Estimator::KNearestNeighbors(knn) => knn.classes(),
            Estimator::MultiLayerPerceptron(mlp) => mlp.classes().to_vec(),
        }
    }
}

impl Classifier for Estimator {
    fn fit(&mut self, features: &NormalizedFeatureMatrix, labels: &[ClassLabel]) -> Result<()> {
        match self {
            Estimator::RandomForest(forest) => forest.fit(features, labels),
            Estimator::KNearestNeighbors(knn) => knn.fit(features, labels),
            Estimator::MultiLayerPerceptron(mlp) => mlp.fit(features, labels),
        }
    }

    fn predict(&self, features: &NormalizedFeatureMatrix) -> Result<Vec<ClassLabel>> {
        match self {
            Estimator::RandomForest(forest) => forest.predict(features),
            Estimator::KNearestNeighbors(knn) => knn.predict(features),
            Estimator::MultiLayerPerceptron(mlp) => mlp.predict(features),
        }
    }
}

#[derive(Encode, Decode)]
struct ModelArtifact {
    format_version: u32,
    feature_columns: Vec<String>,
    classes: Vec<ClassLabel>,
    estimator: Estimator,
}

/// A fitted estimator, immutable once built. Safe to share between request
/// handlers behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    feature_columns: Vec<String>,
    classes: Vec<ClassLabel>,
    estimator: Estimator,
}

impl TrainedModel {
    pub fn from_estimator(estimator: Estimator) -> Result<Self> {
        if !estimator.is_fitted() {
            return Err(Error::Model(format!("{} is not fitted", estimator.name())));
        }
        Ok(Self {
            feature_columns: estimator.columns().to_vec(),
            classes: estimator.classes(),
            estimator,
        })
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn estimator_name(&self) -> &'static str {
        self.estimator.name()
    }

    pub fn predict(&self, features: &NormalizedFeatureMatrix) -> Result<Vec<ClassLabel>> {
        features.ensure_columns(&self.feature_columns)?;
        self.estimator.predict(features)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let artifact = ModelArtifact {
            format_version: MODEL_FORMAT_VERSION,
            feature_columns: self.feature_columns.clone(),
            classes: self.classes.clone(),
            estimator: self.estimator.clone(),
        };
        let mut bytes = MAGIC.to_vec();
        bytes.extend(bitcode::encode(&artifact));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| Error::Model("not a point cloud classifier model".into()))?;
        let artifact: ModelArtifact = bitcode::decode(body)
            .map_err(|e| Error::Model(format!("failed to decode model: {e}")))?;

        if artifact.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::Model(format!(
                "model format version {} is not supported (expected {})",
                artifact.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if !artifact.estimator.is_fitted() {
            return Err(Error::Model("stored estimator is not fitted".into()));
        }
        artifact.estimator.check_structure()?;
        if artifact.feature_columns != artifact.estimator.columns()
            || artifact.classes != artifact.estimator.classes()
        {
            return Err(Error::Model(
                "model metadata does not match the stored estimator".into(),
            ));
        }
        Ok(Self {
            feature_columns: artifact.feature_columns,
            classes: artifact.classes,
            estimator: artifact.estimator,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(path, self.to_bytes()).map_err(|e| Error::io(path, e))?;
        log::info!(
            "saved {} model ({} classes) to {}",
            self.estimator_name(),
            self.classes.len(),
            path.display()
        );
        Ok(())
    }

    /// Loads a model and checks that it was trained on `expected` columns,
    /// in that order.
    pub fn load_for_columns<S: AsRef<str>>(path: &Path, expected: &[S]) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        let model = Self::from_bytes(&bytes)?;

        let matches = model.feature_columns.len() == expected.len()
            && model
                .feature_columns
                .iter()
                .zip(expected)
                .all(|(a, b)| a == b.as_ref());
        if !matches {
            return Err(Error::Model(format!(
                "{} was trained on columns {:?}",
                path.display(),
                model.feature_columns
            )));
        }
        Ok(model)
    }

    /// Loads a model trained on the standard feature columns.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_for_columns(path, &FEATURE_COLUMNS)
    }
}
