use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use glob::glob;
use rayon::iter::{IntoParallelRefIterator as _, ParallelIterator as _};

use pcd_classifier::{
    metrics::{evaluate, Evaluation},
    TrainedModel,
};
use pcd_core::{
    classes::ClassScheme,
    pointcloud::table::{CLASSIFICATION_COLUMN, X_COLUMN, Y_COLUMN},
    Error,
};
use pcd_exporter::{
    plot::{register_text_font, render_report, render_scatter, ScatterStyle},
    xyz::{classified_cloud, write_point_cloud},
};
use pcd_parser::parsers::xyz::read_point_cloud;

use crate::{
    cli::ClassifyArgs,
    error::{AppError, Result},
    logging::status,
};

use super::predict_table;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationMode {
    Skip,
    /// Compare against an independent ground-truth column of the input.
    Truth(String),
    /// Compare the written predictions with themselves. Always reports a
    /// perfect score; kept for compatibility with existing reports.
    SelfCheck,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub scheme: ClassScheme,
    pub style: ScatterStyle,
    pub render_image: bool,
    pub evaluation: EvaluationMode,
    pub report_image: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            scheme: ClassScheme::land_cover(),
            style: ScatterStyle::default(),
            render_image: true,
            evaluation: EvaluationMode::Skip,
            report_image: false,
        }
    }
}

/// Where one classified input is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub cloud: PathBuf,
    pub image: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

impl ArtifactPaths {
    /// `<stem>_classified.xyz`, `<stem>_view1.jpg` and `<stem>_report.png`
    /// under `dir`, the last two only when enabled in `options`.
    pub fn for_stem(stem: &str, dir: &Path, options: &BatchOptions) -> Self {
        Self {
            cloud: dir.join(format!("{stem}_classified.xyz")),
            image: options
                .render_image
                .then(|| dir.join(format!("{stem}_view1.jpg"))),
            report: (options.report_image && options.evaluation != EvaluationMode::Skip)
                .then(|| dir.join(format!("{stem}_report.png"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedFile {
    pub input: PathBuf,
    pub n_points: usize,
    pub paths: ArtifactPaths,
    pub evaluation: Option<Evaluation>,
}

/// READ_CLOUD → SELECT_FEATURES → NORMALIZE → PREDICT → WRITE_CLASSIFIED_CLOUD
/// → RENDER_IMAGES, plus the optional evaluation.
pub fn classify_file(
    model: &TrainedModel,
    input: &Path,
    paths: ArtifactPaths,
    options: &BatchOptions,
) -> pcd_core::Result<ClassifiedFile> {
    let table = read_point_cloud(input)?;
    if paths.image.is_some() {
        table.require_column(X_COLUMN)?;
        table.require_column(Y_COLUMN)?;
    }
    let truth = match &options.evaluation {
        EvaluationMode::Truth(column) => Some(table.labels(column)?),
        _ => None,
    };

    let predictions = predict_table(model, &table)?;
    log::debug!("{}: predicted {} points", input.display(), predictions.len());

    let classified = classified_cloud(&table, &predictions)?;
    write_point_cloud(&classified, &paths.cloud)?;
    log::info!("classified cloud saved to {}", paths.cloud.display());

    if let Some(image) = &paths.image {
        render_scatter(
            classified.require_column(X_COLUMN)?,
            classified.require_column(Y_COLUMN)?,
            &predictions,
            &options.scheme,
            &options.style,
            image,
        )?;
    }

    let truth = match (&options.evaluation, truth) {
        (EvaluationMode::SelfCheck, _) => {
            log::warn!(
                "{}: self-check report compares predictions with themselves, it is not a holdout evaluation",
                input.display()
            );
            Some(classified.labels(CLASSIFICATION_COLUMN)?)
        }
        (_, truth) => truth,
    };
    let evaluation = match truth {
        Some(truth) => {
            let evaluation = evaluate(&truth, &predictions)?;
            let text = evaluation.to_text(&options.scheme);
            log::info!("{}:\n{text}", input.display());
            if let Some(report) = &paths.report {
                render_report(&text, report)?;
            }
            Some(evaluation)
        }
        None => None,
    };

    Ok(ClassifiedFile {
        input: input.to_path_buf(),
        n_points: predictions.len(),
        paths,
        evaluation,
    })
}

/// Expands glob patterns; other arguments are taken as plain paths.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let entries = glob(pattern).map_err(|source| AppError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            for entry in entries {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => log::warn!("skipping unreadable match: {e}"),
                }
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    let mut seen = Vec::with_capacity(paths.len());
    paths.retain(|p| {
        let fresh = !seen.contains(p);
        if fresh {
            seen.push(p.clone());
        }
        fresh
    });

    if paths.is_empty() {
        return Err(AppError::NoInputs);
    }
    Ok(paths)
}

fn output_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cloud".to_string())
}

/// Classifies every input in parallel, one set of artifacts per input under
/// `output_dir`. Failures are logged per file; the batch fails if any did.
pub fn run_batch(
    model: &TrainedModel,
    inputs: &[PathBuf],
    output_dir: &Path,
    options: &BatchOptions,
) -> Result<Vec<ClassifiedFile>> {
    let mut by_stem: HashMap<String, &PathBuf> = HashMap::new();
    for input in inputs {
        if let Some(other) = by_stem.insert(output_stem(input), input) {
            return Err(Error::Config(format!(
                "{} and {} would write the same outputs",
                other.display(),
                input.display()
            ))
            .into());
        }
    }

    fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;

    let results: Vec<(&PathBuf, pcd_core::Result<ClassifiedFile>)> = inputs
        .par_iter()
        .map(|input| {
            let paths = ArtifactPaths::for_stem(&output_stem(input), output_dir, options);
            (input, classify_file(model, input, paths, options))
        })
        .collect();

    let mut classified = Vec::with_capacity(results.len());
    let mut failed = 0;
    for (input, result) in results {
        match result {
            Ok(file) => classified.push(file),
            Err(e) => {
                log::error!("{}: {e}", input.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(AppError::BatchFailed {
            failed,
            total: inputs.len(),
        });
    }
    Ok(classified)
}

/// The `classify` command.
pub fn run(args: &ClassifyArgs) -> Result<()> {
    if let Some(font) = &args.font {
        register_text_font(font)?;
    }

    status("Step 1 - load trained model");
    let model = TrainedModel::load(&args.model)?;
    log::info!(
        "loaded {} model with classes {:?}",
        model.estimator_name(),
        model.classes()
    );

    let inputs = expand_inputs(&args.input)?;
    log::info!("input files: {:?}", inputs);
    log::info!("output folder: {}", args.output_dir.display());

    let evaluation = match (&args.truth_column, args.self_check) {
        (Some(column), _) => EvaluationMode::Truth(column.clone()),
        (None, true) => EvaluationMode::SelfCheck,
        (None, false) => EvaluationMode::Skip,
    };
    if args.report_image && evaluation == EvaluationMode::Skip {
        log::warn!("--report-image needs --truth-column or --self-check, no report image will be written");
    }
    let options = BatchOptions {
        render_image: !args.no_image,
        evaluation,
        report_image: args.report_image,
        ..Default::default()
    };

    status("Step 2 - classify point clouds");
    let classified = run_batch(&model, &inputs, &args.output_dir, &options)?;
    let total: usize = classified.iter().map(|f| f.n_points).sum();
    status(format_args!(
        "classified {total} points in {} file(s)",
        classified.len()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use pcd_core::classes::ClassLabel;

    use super::*;
    use crate::pipeline::test_support::{synthetic_cloud, trained_forest, write_cloud};

    fn quiet_options() -> BatchOptions {
        BatchOptions {
            style: ScatterStyle {
                width: 200,
                height: 200,
                point_size: 1,
                labels: false,
            },
            ..Default::default()
        }
    }

    #[test]
    fn classifies_file_and_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tile_01.xyz");
        let table = synthetic_cloud(15, 3);
        write_cloud(&table, &input);

        let model = trained_forest(1);
        let options = quiet_options();
        let out = dir.path().join("out");
        let paths = ArtifactPaths::for_stem("tile_01", &out, &options);
        let file = classify_file(&model, &input, paths, &options).unwrap();

        assert_eq!(file.n_points, 45);
        assert_eq!(file.paths.cloud, out.join("tile_01_classified.xyz"));
        assert!(file.paths.image.as_ref().unwrap().exists());
        assert!(file.paths.report.is_none());
        assert!(file.evaluation.is_none());

        let written = read_point_cloud(&file.paths.cloud).unwrap();
        assert_eq!(written.n_rows(), 45);
        assert_eq!(written.column("X"), table.column("X"));
    }

    #[test]
    fn truth_column_gives_real_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("labelled.xyz");
        let mut table = synthetic_cloud(15, 4);
        let truth = table.labels(CLASSIFICATION_COLUMN).unwrap();
        table.set_labels("Truth", &truth).unwrap();
        write_cloud(&table, &input);

        let options = BatchOptions {
            render_image: false,
            evaluation: EvaluationMode::Truth("Truth".into()),
            ..quiet_options()
        };
        let paths = ArtifactPaths::for_stem("labelled", dir.path(), &options);
        let file = classify_file(&trained_forest(2), &input, paths, &options).unwrap();
        let evaluation = file.evaluation.unwrap();
        assert_eq!(evaluation.confusion.total(), 45);
        assert!(evaluation.report.accuracy > 0.9);
    }

    #[test]
    fn self_check_is_trivially_perfect() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cloud.xyz");
        write_cloud(&synthetic_cloud(5, 5), &input);

        let options = BatchOptions {
            render_image: false,
            evaluation: EvaluationMode::SelfCheck,
            ..quiet_options()
        };
        let paths = ArtifactPaths::for_stem("cloud", dir.path(), &options);
        let file = classify_file(&trained_forest(1), &input, paths, &options).unwrap();
        assert_eq!(file.evaluation.unwrap().report.accuracy, 1.0);
    }

    #[test]
    fn missing_truth_column_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cloud.xyz");
        write_cloud(&synthetic_cloud(5, 5), &input);

        let options = BatchOptions {
            evaluation: EvaluationMode::Truth("Scalar_field".into()),
            ..quiet_options()
        };
        let paths = ArtifactPaths::for_stem("cloud", dir.path(), &options);
        let cloud = paths.cloud.clone();
        let result = classify_file(&trained_forest(1), &input, paths, &options);
        assert!(matches!(result, Err(Error::Schema(_))));
        assert!(!cloud.exists());
    }

    #[test]
    fn batch_processes_every_input() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["a.xyz", "b.xyz", "c.xyz"].iter().enumerate() {
            write_cloud(&synthetic_cloud(5, i as u64), &dir.path().join(name));
        }
        let pattern = dir.path().join("*.xyz").to_string_lossy().into_owned();
        let inputs = expand_inputs(&[pattern]).unwrap();
        assert_eq!(inputs.len(), 3);

        let out = dir.path().join("out");
        let classified = run_batch(&trained_forest(1), &inputs, &out, &quiet_options()).unwrap();
        assert_eq!(classified.len(), 3);
        for stem in ["a", "b", "c"] {
            assert!(out.join(format!("{stem}_classified.xyz")).exists());
            assert!(out.join(format!("{stem}_view1.jpg")).exists());
        }
    }

    #[test]
    fn one_bad_input_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.xyz");
        write_cloud(&synthetic_cloud(5, 1), &good);
        let bad = dir.path().join("bad.xyz");
        fs::write(&bad, "X Y Z\n1 2 3\n").unwrap();

        let out = dir.path().join("out");
        let result = run_batch(&trained_forest(1), &[good, bad], &out, &quiet_options());
        assert!(matches!(
            result,
            Err(AppError::BatchFailed {
                failed: 1,
                total: 2
            })
        ));
        assert!(out.join("good_classified.xyz").exists());
    }

    #[test]
    fn colliding_stems_are_rejected() {
        let inputs = [PathBuf::from("a/cloud.xyz"), PathBuf::from("b/cloud.xyz")];
        let dir = tempfile::tempdir().unwrap();
        let result = run_batch(&trained_forest(1), &inputs, dir.path(), &quiet_options());
        assert!(matches!(result, Err(AppError::Pipeline(Error::Config(_)))));
    }

    #[test]
    fn plain_inputs_are_kept_in_order_without_duplicates() {
        let inputs =
            expand_inputs(&["b.xyz".to_string(), "a.xyz".to_string(), "b.xyz".to_string()])
                .unwrap();
        assert_eq!(inputs, vec![PathBuf::from("b.xyz"), PathBuf::from("a.xyz")]);
        assert!(matches!(expand_inputs(&[]), Err(AppError::NoInputs)));
    }

    #[test]
    fn unmapped_prediction_fails_at_render_time() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cloud.xyz");
        write_cloud(&synthetic_cloud(5, 5), &input);

        let options = BatchOptions {
            scheme: ClassScheme::new(vec![]),
            ..quiet_options()
        };
        let paths = ArtifactPaths::for_stem("cloud", dir.path(), &options);
        let result = classify_file(&trained_forest(1), &input, paths, &options);
        assert!(matches!(
            result,
            Err(Error::UnmappedClass(ClassLabel(1 | 2 | 3)))
        ));
    }
}
