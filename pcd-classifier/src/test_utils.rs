use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

use pcd_core::{
    classes::ClassLabel,
    pointcloud::{
        feature::{FeatureMatrix, FEATURE_COLUMNS},
        normalize::{batch_relative_normalize, NormalizedFeatureMatrix},
    },
};

/// Three well separated blobs over the ten model features: ground is low and
/// planar, vegetation scattered, buildings high and vertical.
pub fn blobs(n_per_class: usize, seed: u64) -> (NormalizedFeatureMatrix, Vec<ClassLabel>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers: [(ClassLabel, f64); 3] = [
        (ClassLabel(1), 0.0),
        (ClassLabel(2), 5.0),
        (ClassLabel(3), 10.0),
    ];

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for (label, center) in centers {
        for _ in 0..n_per_class {
            let row: Vec<f64> = (0..FEATURE_COLUMNS.len())
                .map(|_| center + rng.gen_range(-1.0..1.0))
                .collect();
            rows.push(row);
            labels.push(label);
        }
    }

    let columns = FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect();
    let features = FeatureMatrix::from_rows(columns, &rows).unwrap();
    (batch_relative_normalize(&features).unwrap(), labels)
}

pub fn accuracy(expected: &[ClassLabel], predicted: &[ClassLabel]) -> f64 {
    let hits = expected
        .iter()
        .zip(predicted)
        .filter(|(a, b)| a == b)
        .count();
    hits as f64 / expected.len() as f64
}
