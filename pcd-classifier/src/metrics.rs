//! Confusion matrix and per-class precision / recall / F1.

use std::fmt::Write as _;

use pcd_core::{
    classes::{observed_labels, ClassLabel, ClassScheme},
    Error, Result,
};

/// Rows are true classes, columns predicted classes, both in `labels` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    labels: Vec<ClassLabel>,
    counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    /// Built over the sorted union of labels seen in either input.
    pub fn compute(y_true: &[ClassLabel], y_pred: &[ClassLabel]) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(Error::Shape(format!(
                "{} true labels but {} predictions",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_true.is_empty() {
            return Err(Error::Shape("no labels to evaluate".into()));
        }

        let labels = observed_labels(&[y_true, y_pred]);
        let index = |label: &ClassLabel| labels.binary_search(label).unwrap_or_default();
        let mut counts = vec![vec![0u64; labels.len()]; labels.len()];
        for (t, p) in y_true.iter().zip(y_pred) {
            counts[index(t)][index(p)] += 1;
        }
        Ok(Self { labels, counts })
    }

    pub fn labels(&self) -> &[ClassLabel] {
        &self.labels
    }

    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn to_text(&self, scheme: &ClassScheme) -> String {
        let names: Vec<String> = self.labels.iter().map(|&l| scheme.name(l)).collect();
        let cell = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .chain(names.iter().map(String::len))
            .max()
            .unwrap_or(1)
            .max(4);
        let head = names.iter().map(String::len).max().unwrap_or(0).max("true\\pred".len());

        let mut out = String::new();
        let _ = write!(out, "{:>head$}", "true\\pred");
        for name in &names {
            let _ = write!(out, " {name:>cell$}");
        }
        out.push('\n');
        for (name, row) in names.iter().zip(&self.counts) {
            let _ = write!(out, "{name:>head$}");
            for count in row {
                let _ = write!(out, " {count:>cell$}");
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    pub label: ClassLabel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ClassificationReport {
    pub fn from_confusion(matrix: &ConfusionMatrix) -> Self {
        let n = matrix.labels.len();
        let counts = &matrix.counts;

        let per_class: Vec<ClassMetrics> = (0..n)
            .map(|i| {
                let tp = counts[i][i];
                let support: u64 = counts[i].iter().sum();
                let predicted: u64 = counts.iter().map(|row| row[i]).sum();
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: matrix.labels[i],
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total = matrix.total();
        let mean = |f: fn(&ClassMetrics) -> f64| {
            per_class.iter().map(f).sum::<f64>() / n.max(1) as f64
        };
        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                per_class.iter().map(|m| f(m) * m.support as f64).sum::<f64>() / total as f64
            }
        };

        Self {
            accuracy: ratio(matrix.correct(), total),
            macro_avg: AveragedMetrics {
                precision: mean(|m| m.precision),
                recall: mean(|m| m.recall),
                f1: mean(|m| m.f1),
                support: total,
            },
            weighted_avg: AveragedMetrics {
                precision: weighted(|m| m.precision),
                recall: weighted(|m| m.recall),
                f1: weighted(|m| m.f1),
                support: total,
            },
            per_class,
        }
    }

    pub fn class(&self, label: ClassLabel) -> Option<&ClassMetrics> {
        self.per_class.iter().find(|m| m.label == label)
    }

    /// Fixed-width text in the usual precision/recall/f1-score/support layout.
    pub fn to_text(&self, scheme: &ClassScheme) -> String {
        let digits = 2;
        let names: Vec<String> = self.per_class.iter().map(|m| scheme.name(m.label)).collect();
        let width = names
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max("weighted avg".len());

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>width$}  {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        );
        out.push('\n');
        for (name, m) in names.iter().zip(&self.per_class) {
            let _ = writeln!(
                out,
                "{:>width$}  {:>9.digits$} {:>9.digits$} {:>9.digits$} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            );
        }
        out.push('\n');
        let _ = writeln!(
            out,
            "{:>width$}  {:>9} {:>9} {:>9.digits$} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        );
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            let _ = writeln!(
                out,
                "{:>width$}  {:>9.digits$} {:>9.digits$} {:>9.digits$} {:>9}",
                name, avg.precision, avg.recall, avg.f1, avg.support
            );
        }
        out
    }
}

/// Confusion matrix plus report for one set of predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
}

impl Evaluation {
    pub fn to_text(&self, scheme: &ClassScheme) -> String {
        format!(
            "Confusion matrix:\n{}\nClassification report:\n{}",
            self.confusion.to_text(scheme),
            self.report.to_text(scheme)
        )
    }
}

pub fn evaluate(y_true: &[ClassLabel], y_pred: &[ClassLabel]) -> Result<Evaluation> {
    let confusion = ConfusionMatrix::compute(y_true, y_pred)?;
    let report = ClassificationReport::from_confusion(&confusion);
    Ok(Evaluation { confusion, report })
}
