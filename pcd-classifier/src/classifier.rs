use pcd_core::{
    classes::ClassLabel,
    pointcloud::normalize::NormalizedFeatureMatrix,
    Error, Result,
};

/// Maps normalized feature rows to class labels.
pub trait Classifier {
    /// Trains on `features`, one label per row.
    fn fit(&mut self, features: &NormalizedFeatureMatrix, labels: &[ClassLabel]) -> Result<()>;

    /// One label per row of `features`, in row order. The columns must be the
    /// ones the classifier was fit on.
    fn predict(&self, features: &NormalizedFeatureMatrix) -> Result<Vec<ClassLabel>>;
}

pub(crate) fn check_training_shape(
    features: &NormalizedFeatureMatrix,
    labels: &[ClassLabel],
) -> Result<()> {
    if features.n_rows() != labels.len() {
        return Err(Error::Shape(format!(
            "{} feature rows but {} labels",
            features.n_rows(),
            labels.len()
        )));
    }
    if labels.is_empty() {
        return Err(Error::Shape("cannot fit on an empty training set".into()));
    }
    Ok(())
}

/// Index of the highest count; ties go to the lowest index.
pub(crate) fn argmax(counts: &[u32]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}
