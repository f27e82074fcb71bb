use bitcode::{Decode, Encode};
use rayon::{iter::ParallelIterator as _, slice::ParallelSlice as _};

use pcd_core::{
    classes::ClassLabel, pointcloud::normalize::NormalizedFeatureMatrix, Error, Result,
};

use crate::classifier::{check_training_shape, Classifier};

/// Brute-force k-nearest-neighbours over the training rows (Euclidean).
///
/// A tied vote goes to the class whose member is closest to the query.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct KNearestNeighbors {
    n_neighbors: u32,
    columns: Vec<String>,
    points: Vec<f64>,
    labels: Vec<ClassLabel>,
}

impl KNearestNeighbors {
    pub fn new(n_neighbors: u32) -> Self {
        Self {
            n_neighbors,
            columns: Vec::new(),
            points: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn n_neighbors(&self) -> u32 {
        self.n_neighbors
    }

    pub fn is_fitted(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn classes(&self) -> Vec<ClassLabel> {
        pcd_core::classes::observed_labels(&[&self.labels])
    }

    pub fn check_structure(&self) -> Result<()> {
        if self.n_neighbors == 0 {
            return Err(Error::Model("k-nearest-neighbours model has n_neighbors = 0".into()));
        }
        if self.columns.is_empty() {
            return Err(Error::Model("k-nearest-neighbours model has no columns".into()));
        }
        let expected = self.labels.len().checked_mul(self.columns.len());
        if expected != Some(self.points.len()) {
            return Err(Error::Model(format!(
                "k-nearest-neighbours model holds {} values for {} points of {} columns",
                self.points.len(),
                self.labels.len(),
                self.columns.len()
            )));
        }
        Ok(())
    }

    fn vote(&self, query: &[f64]) -> ClassLabel {
        let width = self.columns.len();
        let mut distances: Vec<(f64, usize)> = self
            .points
            .chunks_exact(width)
            .enumerate()
            .map(|(i, point)| {
                let d = point
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>();
                (d, i)
            })
            .collect();

        let k = (self.n_neighbors as usize).min(distances.len());
        if k < distances.len() {
            distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
            distances.truncate(k);
        }
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        // (label, votes) in order of first appearance, i.e. nearest first
        let mut tally: Vec<(ClassLabel, u32)> = Vec::new();
        for &(_, i) in &distances {
            let label = self.labels[i];
            match tally.iter_mut().find(|(l, _)| *l == label) {
                Some((_, votes)) => *votes += 1,
                None => tally.push((label, 1)),
            }
        }
        let mut best = tally[0];
        for &entry in &tally[1..] {
            if entry.1 > best.1 {
                best = entry;
            }
        }
        best.0
    }
}

impl Classifier for KNearestNeighbors {
    fn fit(&mut self, features: &NormalizedFeatureMatrix, labels: &[ClassLabel]) -> Result<()> {
        check_training_shape(features, labels)?;
        if self.n_neighbors == 0 {
            return Err(Error::Config("n_neighbors must be at least 1".into()));
        }
        self.columns = features.columns().to_vec();
        self.points = features.values().to_vec();
        self.labels = labels.to_vec();
        Ok(())
    }

    fn predict(&self, features: &NormalizedFeatureMatrix) -> Result<Vec<ClassLabel>> {
        if !self.is_fitted() {
            return Err(Error::Model("k-nearest-neighbours model is not fitted".into()));
        }
        features.ensure_columns(&self.columns)?;
        if features.n_rows() == 0 {
            return Ok(Vec::new());
        }
        Ok(features
            .values()
            .par_chunks_exact(features.n_cols())
            .map(|row| self.vote(row))
            .collect())
    }
}
