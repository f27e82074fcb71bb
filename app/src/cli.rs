use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::{EstimatorKind, TrainingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "Point Classifier",
    about = "A tool for classifying LiDAR point clouds into ground, vegetation and buildings",
    author = "MIERUNE Inc.",
    version = "0.1.0"
)]
pub struct Cli {
    /// Append log records to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify point clouds with a trained model
    Classify(ClassifyArgs),
    /// Train a model, evaluate it on a held-out split and save it
    Train(TrainArgs),
    /// Train every estimator on the same split and report each one
    Compare(TrainArgs),
    /// Serve classification over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Input files or glob patterns
    #[arg(short, long, required = true, num_args = 1.., value_name = "FILE")]
    pub input: Vec<String>,

    #[arg(short, long, value_name = "DIR")]
    pub output_dir: PathBuf,

    #[arg(short, long, default_value = "models/model_trained.bin")]
    pub model: PathBuf,

    /// Evaluate the predictions against this ground-truth column of the input
    #[arg(long, value_name = "COLUMN", conflicts_with = "self_check")]
    pub truth_column: Option<String>,

    /// Report computed from the written predictions themselves; not a holdout
    /// evaluation
    #[arg(long)]
    pub self_check: bool,

    /// Skip the scatter image
    #[arg(long)]
    pub no_image: bool,

    /// Also render the evaluation report as an image
    #[arg(long)]
    pub report_image: bool,

    /// TrueType font for image captions and reports
    #[arg(long, value_name = "FILE")]
    pub font: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// JSON file with training settings; flags below override it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub train: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub validation: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub unlabeled: Option<PathBuf>,

    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub estimator: Option<EstimatorKind>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub n_trees: Option<u32>,

    #[arg(long)]
    pub test_fraction: Option<f64>,

    #[arg(long)]
    pub validation_fraction: Option<f64>,
}

impl TrainArgs {
    /// Loads the config file (or defaults) and applies the flags on top.
    pub fn resolve(&self) -> crate::error::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };
        if let Some(path) = &self.train {
            config.train_path = path.clone();
        }
        if let Some(path) = &self.validation {
            config.validation_path = Some(path.clone());
        }
        if let Some(path) = &self.unlabeled {
            config.unlabeled_path = Some(path.clone());
        }
        if let Some(path) = &self.output {
            config.output_path = path.clone();
        }
        if let Some(path) = &self.model {
            config.model_path = path.clone();
        }
        if let Some(kind) = self.estimator {
            config.model = kind;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(n_trees) = self.n_trees {
            config.n_trees = n_trees;
        }
        if let Some(fraction) = self.test_fraction {
            config.test_fraction = fraction;
        }
        if let Some(fraction) = self.validation_fraction {
            config.validation_sample_fraction = fraction;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    #[arg(short, long, default_value = "models/model_trained.bin")]
    pub model: PathBuf,

    /// Parent of the download_data, classified_data and images directories
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub work_dir: PathBuf,

    #[arg(long, default_value_t = 512)]
    pub max_upload_mb: usize,

    /// TrueType font for image captions
    #[arg(long, value_name = "FILE")]
    pub font: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "pcls",
            "train",
            "--train",
            "a.xyz",
            "--estimator",
            "knn",
            "--test-fraction",
            "0.25",
        ]);
        let Command::Train(args) = cli.command else {
            panic!("expected train");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.train_path, PathBuf::from("a.xyz"));
        assert_eq!(config.model, EstimatorKind::Knn);
        assert_eq!(config.test_fraction, 0.25);
        assert_eq!(config.n_trees, 100);
    }

    #[test]
    fn invalid_fraction_flag_fails_validation() {
        let args = TrainArgs {
            test_fraction: Some(1.0),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn classify_accepts_several_inputs() {
        let cli = Cli::parse_from([
            "pcls", "classify", "-i", "a.xyz", "b/*.xyz", "-o", "out", "--self-check",
        ]);
        let Command::Classify(args) = cli.command else {
            panic!("expected classify");
        };
        assert_eq!(args.input, vec!["a.xyz", "b/*.xyz"]);
        assert!(args.self_check);
        assert!(args.truth_column.is_none());
    }
}
