pub mod batch;
pub mod training;

use pcd_classifier::TrainedModel;
use pcd_core::{
    classes::ClassLabel,
    pointcloud::{
        feature::select_features, normalize::batch_relative_normalize, table::PointCloudTable,
    },
    Result,
};

/// Feature selection, batch-relative normalization and prediction for a whole
/// table. One label per row, in row order.
pub fn predict_table(model: &TrainedModel, table: &PointCloudTable) -> Result<Vec<ClassLabel>> {
    let features = select_features(table)?;
    let normalized = batch_relative_normalize(&features)?;
    model.predict(&normalized)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    use pcd_classifier::{
        forest::{ForestParams, RandomForest},
        Classifier as _, Estimator, TrainedModel,
    };
    use pcd_core::{
        classes::ClassLabel,
        pointcloud::{
            feature::{select_features, FEATURE_COLUMNS},
            normalize::batch_relative_normalize,
            table::{PointCloudTable, CLASSIFICATION_COLUMN, X_COLUMN, Y_COLUMN},
        },
    };
    use pcd_exporter::xyz::write_point_cloud;

    /// Three well separated classes (1, 2, 3), rows interleaved by class.
    /// Every feature of class `c` lies around `5 * (c - 1)`.
    pub fn synthetic_cloud(n_per_class: usize, seed: u64) -> PointCloudTable {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut names = vec![X_COLUMN.to_string(), Y_COLUMN.to_string()];
        names.extend(FEATURE_COLUMNS.iter().map(|c| c.to_string()));
        names.push(CLASSIFICATION_COLUMN.to_string());

        let mut table = PointCloudTable::new(names);
        for _ in 0..n_per_class {
            for class in 1..=3 {
                let centre = 5.0 * (class - 1) as f64;
                let mut row = vec![rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)];
                row.extend((0..FEATURE_COLUMNS.len()).map(|_| centre + rng.gen_range(-1.0..1.0)));
                row.push(class as f64);
                table.push_row(&row).unwrap();
            }
        }
        table
    }

    pub fn trained_forest(seed: u64) -> TrainedModel {
        let table = synthetic_cloud(40, seed);
        let features = batch_relative_normalize(&select_features(&table).unwrap()).unwrap();
        let labels = table.labels(CLASSIFICATION_COLUMN).unwrap();
        let mut estimator = Estimator::RandomForest(RandomForest::new(ForestParams {
            n_trees: 10,
            seed: Some(seed),
            ..Default::default()
        }));
        estimator.fit(&features, &labels).unwrap();
        TrainedModel::from_estimator(estimator).unwrap()
    }

    pub fn write_cloud(table: &PointCloudTable, path: &Path) {
        write_point_cloud(table, path).unwrap();
    }

    pub fn accuracy(expected: &[ClassLabel], predicted: &[ClassLabel]) -> f64 {
        let hits = expected.iter().zip(predicted).filter(|(a, b)| a == b).count();
        hits as f64 / expected.len() as f64
    }
}
