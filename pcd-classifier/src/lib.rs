pub mod classifier;
pub mod forest;
pub mod knn;
pub mod metrics;
pub mod mlp;
pub mod model;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_utils;

pub use classifier::Classifier;
pub use model::{Estimator, TrainedModel};
