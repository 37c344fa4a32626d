//! Per-genre precision / recall / F1 on held-out predictions.

use std::{collections::BTreeSet, fmt};

use serde::Serialize;
use smartcore::metrics::accuracy;
use statrs::statistics::{Data, Distribution};

use crate::error::{GenreError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub genre: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Averages {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub total: usize,
    pub macro_avg: Averages,
    pub weighted_avg: Averages,
}

impl ClassificationReport {
    pub fn get(&self, genre: &str) -> Option<&ClassMetrics> {
        self.classes.iter().find(|c| c.genre == genre)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values).mean().unwrap_or(0.0)
}

/// Build the report for every genre index present in `y_true`.
///
/// `genre_names[i]` names index `i`. Undefined ratios (no predicted or no actual
/// instances) are reported as 0.
pub fn report(
    y_true: &[usize],
    y_pred: &[usize],
    genre_names: &[String],
) -> Result<ClassificationReport> {
    if y_true.len() != y_pred.len() {
        return Err(GenreError::Configuration(format!(
            "{} true labels but {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }

    let present: BTreeSet<usize> = y_true.iter().copied().collect();
    let classes: Vec<ClassMetrics> = present
        .into_iter()
        .map(|class| {
            let support = y_true.iter().filter(|&&t| t == class).count();
            let predicted = y_pred.iter().filter(|&&p| p == class).count();
            let tp = y_true
                .iter()
                .zip(y_pred)
                .filter(|&(&t, &p)| t == class && p == class)
                .count();

            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            ClassMetrics {
                genre: genre_names
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| format!("class {class}")),
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    let overall = if y_true.is_empty() {
        0.0
    } else {
        let t: Vec<i32> = y_true.iter().map(|&v| v as i32).collect();
        let p: Vec<i32> = y_pred.iter().map(|&v| v as i32).collect();
        accuracy(&t, &p)
    };

    let macro_avg = Averages {
        precision: mean(classes.iter().map(|c| c.precision)),
        recall: mean(classes.iter().map(|c| c.recall)),
        f1: mean(classes.iter().map(|c| c.f1)),
    };

    let weighted = |pick: fn(&ClassMetrics) -> f64| {
        let total: usize = classes.iter().map(|c| c.support).sum();
        ratio(1, total) * classes.iter().map(|c| pick(c) * c.support as f64).sum::<f64>()
    };
    let weighted_avg = Averages {
        precision: weighted(|c| c.precision),
        recall: weighted(|c| c.recall),
        f1: weighted(|c| c.f1),
    };

    Ok(ClassificationReport {
        classes,
        accuracy: overall,
        total: y_true.len(),
        macro_avg,
        weighted_avg,
    })
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|c| c.genre.len())
            .chain(["weighted avg".len()])
            .max()
            .unwrap_or(12);

        writeln!(
            f,
            "{:>width$} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                c.genre, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, avg.precision, avg.recall, avg.f1, self.total
            )?;
        }
        Ok(())
    }
}
