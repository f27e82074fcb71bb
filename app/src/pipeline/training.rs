//! Offline training: LOAD_TRAIN_DATA → LOAD_VALIDATION_DATA →
//! MERGE_SAMPLED_VALIDATION → SPLIT_TRAIN_TEST → NORMALIZE → FIT → EVALUATE →
//! PERSIST_MODEL → CLASSIFY_HOLDOUT → WRITE_OUTPUT.
//!
//! The split comes before normalization and each partition is scaled on its
//! own rows, the same way a cloud is scaled at inference time.

use std::{
    path::Path,
    time::{Duration, Instant},
};

use rand::{rngs::StdRng, SeedableRng as _};

use pcd_classifier::{
    metrics::{evaluate, Evaluation},
    Classifier as _, TrainedModel,
};
use pcd_core::{
    classes::{ClassLabel, LabelRemap},
    pointcloud::{
        feature::{select_features, FeatureMatrix},
        normalize::{batch_relative_normalize, NormalizedFeatureMatrix},
        sampling::{sample_rows, train_test_split},
    },
    Result,
};
use pcd_exporter::xyz::write_classified_cloud;
use pcd_parser::parsers::xyz::read_point_cloud;

use crate::{
    config::{EstimatorKind, TrainingConfig},
    logging::status,
};

use super::predict_table;

/// Normalized train and test partitions with their labels.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: NormalizedFeatureMatrix,
    pub train_labels: Vec<ClassLabel>,
    pub test: NormalizedFeatureMatrix,
    pub test_labels: Vec<ClassLabel>,
}

#[derive(Debug)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    pub evaluation: Evaluation,
    /// Rows written to the output file, when an unlabeled cloud was given.
    pub classified_rows: Option<usize>,
}

#[derive(Debug)]
pub struct ComparisonEntry {
    pub estimator: EstimatorKind,
    pub fit_time: Duration,
    pub evaluation: Evaluation,
}

fn load_labeled(path: &Path, label_column: &str, remap: &LabelRemap) -> Result<(FeatureMatrix, Vec<ClassLabel>)> {
    let table = read_point_cloud(path)?;
    let features = select_features(&table)?;
    let mut labels = table.labels(label_column)?;
    remap.apply_all(&mut labels);
    log::info!("{}: {} labelled rows", path.display(), labels.len());
    Ok((features, labels))
}

fn concat_rows(head: &FeatureMatrix, tail: &FeatureMatrix) -> Result<FeatureMatrix> {
    tail.ensure_columns(head.columns())?;
    FeatureMatrix::new(head.columns().to_vec(), [head.values(), tail.values()].concat())
}

fn take_labels(labels: &[ClassLabel], rows: &[usize]) -> Vec<ClassLabel> {
    rows.iter().map(|&i| labels[i]).collect()
}

/// Stages up to NORMALIZE, shared by training and comparison.
pub fn prepare_data(config: &TrainingConfig, rng: &mut StdRng) -> Result<PreparedData> {
    let remap = config.label_remap();

    status("Step 1 - load training data");
    let (mut features, mut labels) = load_labeled(&config.train_path, &config.label_column, &remap)?;

    if let Some(validation_path) = &config.validation_path {
        status("Step 2 - load validation data");
        let (val_features, val_labels) =
            load_labeled(validation_path, &config.label_column, &remap)?;

        status("Step 3 - merge sampled validation rows");
        let rows = sample_rows(val_features.n_rows(), config.validation_sample_fraction, rng)?;
        features = concat_rows(&features, &val_features.take_rows(&rows))?;
        labels.extend(take_labels(&val_labels, &rows));
        log::info!(
            "merged {} of {} validation rows into {} training rows",
            rows.len(),
            val_labels.len(),
            labels.len()
        );
    }

    status("Step 4 - split train / test");
    let (train_rows, test_rows) = train_test_split(features.n_rows(), config.test_fraction, rng)?;
    log::info!("{} train rows, {} test rows", train_rows.len(), test_rows.len());

    status("Step 5 - normalize features");
    Ok(PreparedData {
        train: batch_relative_normalize(&features.take_rows(&train_rows))?,
        train_labels: take_labels(&labels, &train_rows),
        test: batch_relative_normalize(&features.take_rows(&test_rows))?,
        test_labels: take_labels(&labels, &test_rows),
    })
}

fn seeded_rng(config: &TrainingConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn fit_and_evaluate(
    config: &TrainingConfig,
    kind: EstimatorKind,
    data: &PreparedData,
) -> Result<(TrainedModel, Evaluation, Duration)> {
    let mut estimator = config.estimator(kind);
    status(format_args!("Step 6 - train {}", estimator.name()));
    let start = Instant::now();
    estimator.fit(&data.train, &data.train_labels)?;
    let fit_time = start.elapsed();
    let model = TrainedModel::from_estimator(estimator)?;
    status(format_args!(
        "{} trained in {:.2} s",
        model.estimator_name(),
        fit_time.as_secs_f64()
    ));

    status("Step 7 - evaluate on the test split");
    let predictions = model.predict(&data.test)?;
    let evaluation = evaluate(&data.test_labels, &predictions)?;
    log::info!(
        "{} on {} test rows:\n{}",
        model.estimator_name(),
        data.test_labels.len(),
        evaluation.to_text(&config.class_scheme())
    );
    Ok((model, evaluation, fit_time))
}

/// The `train` command.
pub fn run_training(config: &TrainingConfig) -> Result<TrainingOutcome> {
    config.validate()?;
    let mut rng = seeded_rng(config);
    let data = prepare_data(config, &mut rng)?;

    let (model, evaluation, _) = fit_and_evaluate(config, config.model, &data)?;

    status("Step 8 - save model");
    model.save(&config.model_path)?;

    let classified_rows = match &config.unlabeled_path {
        Some(unlabeled_path) => {
            status("Step 9 - classify unlabeled cloud");
            let table = read_point_cloud(unlabeled_path)?;
            let predictions = predict_table(&model, &table)?;

            status("Step 10 - write classified cloud");
            write_classified_cloud(&table, &predictions, &config.output_path)?;
            log::info!("classified cloud saved to {}", config.output_path.display());
            Some(predictions.len())
        }
        None => {
            log::info!("no unlabeled cloud configured, skipping classification");
            None
        }
    };

    Ok(TrainingOutcome {
        model,
        evaluation,
        classified_rows,
    })
}

/// The `compare` command: every estimator on the same split. Nothing is saved.
pub fn run_comparison(config: &TrainingConfig) -> Result<Vec<ComparisonEntry>> {
    config.validate()?;
    let mut rng = seeded_rng(config);
    let data = prepare_data(config, &mut rng)?;

    let mut entries = Vec::with_capacity(EstimatorKind::ALL.len());
    for kind in EstimatorKind::ALL {
        let (_, evaluation, fit_time) = fit_and_evaluate(config, kind, &data)?;
        entries.push(ComparisonEntry {
            estimator: kind,
            fit_time,
            evaluation,
        });
    }

    for entry in &entries {
        log::info!(
            "{:?}: accuracy {:.4}, weighted f1 {:.4}, fit {:.2} s",
            entry.estimator,
            entry.evaluation.report.accuracy,
            entry.evaluation.report.weighted_avg.f1,
            entry.fit_time.as_secs_f64()
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pcd_core::{
        pointcloud::table::{PointCloudTable, CLASSIFICATION_COLUMN},
        Error,
    };

    use super::*;
    use crate::pipeline::test_support::{synthetic_cloud, write_cloud};

    fn config_in(dir: &Path) -> TrainingConfig {
        let train_path = dir.join("train.xyz");
        write_cloud(&synthetic_cloud(40, 1), &train_path);
        TrainingConfig {
            train_path,
            output_path: dir.join("out").join("classified.xyz"),
            model_path: dir.join("models").join("model.bin"),
            seed: Some(42),
            n_trees: 15,
            hidden_units: 16,
            epochs: 200,
            batch_size: 32,
            learning_rate: 0.01,
            ..Default::default()
        }
    }

    #[test]
    fn trains_saves_and_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let unlabeled = dir.path().join("unlabeled.xyz");
        write_cloud(&synthetic_cloud(10, 9), &unlabeled);
        let config = TrainingConfig {
            unlabeled_path: Some(unlabeled),
            ..config_in(dir.path())
        };

        let outcome = run_training(&config).unwrap();
        assert!(outcome.evaluation.report.accuracy > 0.9);
        assert_eq!(outcome.evaluation.confusion.total(), 48);
        assert_eq!(outcome.classified_rows, Some(30));

        let loaded = TrainedModel::load(&config.model_path).unwrap();
        assert_eq!(loaded, outcome.model);

        let written = read_point_cloud(&config.output_path).unwrap();
        assert_eq!(written.n_rows(), 30);
        assert!(written.column(CLASSIFICATION_COLUMN).is_some());
    }

    #[test]
    fn fixed_seed_reproduces_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let a = run_training(&config).unwrap();
        let b = run_training(&config).unwrap();
        assert_eq!(a.model, b.model);
        assert_eq!(a.evaluation, b.evaluation);
        assert_eq!(a.classified_rows, None);
    }

    #[test]
    fn merges_sampled_validation_rows() {
        let dir = tempfile::tempdir().unwrap();
        let validation = dir.path().join("validation.xyz");
        write_cloud(&synthetic_cloud(100, 7), &validation);
        let config = TrainingConfig {
            validation_path: Some(validation),
            ..config_in(dir.path())
        };

        let mut rng = StdRng::seed_from_u64(3);
        let data = prepare_data(&config, &mut rng).unwrap();
        let pooled = data.train_labels.len() + data.test_labels.len();
        assert!(pooled > 120 && pooled < 120 + 300, "pooled {pooled}");
        assert_eq!(data.train.n_rows(), data.train_labels.len());
        assert_eq!(data.test.n_rows(), data.test_labels.len());
    }

    #[test]
    fn remaps_source_codes() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = synthetic_cloud(40, 2);
        let asprs: Vec<ClassLabel> = table
            .labels(CLASSIFICATION_COLUMN)
            .unwrap()
            .into_iter()
            .map(|l| ClassLabel([2, 5, 6][(l.0 - 1) as usize]))
            .collect();
        table.set_labels("Scalar_field", &asprs).unwrap();
        let train_path = dir.path().join("asprs.xyz");
        write_cloud(&table, &train_path);

        let config = TrainingConfig {
            train_path,
            label_column: "Scalar_field".into(),
            label_remap: BTreeMap::from([(2, 1), (5, 2), (6, 3)]),
            unmapped_label: Some(4),
            ..config_in(dir.path())
        };
        let mut rng = StdRng::seed_from_u64(0);
        let data = prepare_data(&config, &mut rng).unwrap();
        assert!(data
            .train_labels
            .iter()
            .chain(&data.test_labels)
            .all(|l| (1..=3).contains(&l.0)));
    }

    #[test]
    fn missing_label_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            label_column: "Scalar_field".into(),
            ..config_in(dir.path())
        };
        assert!(matches!(run_training(&config), Err(Error::Schema(_))));
        assert!(!config.model_path.exists());
    }

    #[test]
    fn missing_features_stop_before_fitting() {
        let dir = tempfile::tempdir().unwrap();
        let train_path = dir.path().join("bare.xyz");
        let table = PointCloudTable::from_columns(vec![
            ("X".into(), vec![0.0, 1.0]),
            ("Classification".into(), vec![1.0, 2.0]),
        ])
        .unwrap();
        write_cloud(&table, &train_path);
        let config = TrainingConfig {
            train_path,
            ..config_in(dir.path())
        };
        assert!(matches!(run_training(&config), Err(Error::Schema(_))));
    }

    #[test]
    fn comparison_covers_every_estimator() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let entries = run_comparison(&config).unwrap();
        assert_eq!(entries.len(), EstimatorKind::ALL.len());
        for entry in &entries {
            assert!(entry.evaluation.report.accuracy > 0.9);
        }
        assert!(!config.model_path.exists());
    }
}
