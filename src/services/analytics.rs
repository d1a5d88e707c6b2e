//! Small numeric routines used to ground model answers in computed values.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::dataset::DatasetMetadata;

/// Calculate the Pearson correlation coefficient between two columns.
/// Only rows where both values are present are used.
pub fn calculate_correlation(left: &[Option<f64>], right: &[Option<f64>]) -> Result<(f64, usize)> {
    if left.len() != right.len() {
        return Err(anyhow!("Columns must have the same length"));
    }

    let pairs: Vec<(f64, f64)> = left
        .iter()
        .zip(right.iter())
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((*x, *y)),
            _ => None,
        })
        .collect();

    // Need at least 2 pairs to calculate correlation
    if pairs.len() < 2 {
        return Err(anyhow!("Not enough valid data points to compute correlation"));
    }

    let n = pairs.len() as f64;
    let mean1 = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean2 = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov_sum = 0.0;
    let mut var1_sum = 0.0;
    let mut var2_sum = 0.0;
    for (x, y) in &pairs {
        let dx = x - mean1;
        let dy = y - mean2;
        cov_sum += dx * dy;
        var1_sum += dx * dx;
        var2_sum += dy * dy;
    }

    if var1_sum.abs() < f64::EPSILON || var2_sum.abs() < f64::EPSILON {
        return Err(anyhow!("Cannot compute correlation: one or both columns have zero variance"));
    }

    // Floating point noise can push the ratio slightly past ±1
    let correlation = (cov_sum / (var1_sum.sqrt() * var2_sum.sqrt())).clamp(-1.0, 1.0);
    Ok((correlation, pairs.len()))
}

/// Square matrix of Pearson coefficients for `columns`, read from the
/// dataset's precomputed pairs. `None` marks pairs with no coefficient
/// (fewer than two shared rows, or zero variance).
pub fn correlation_matrix(meta: &DatasetMetadata, columns: &[String]) -> Vec<Vec<Option<f64>>> {
    columns
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|col| {
                    if row == col {
                        return meta.column(row).map(|_| 1.0);
                    }
                    meta.correlations
                        .iter()
                        .find(|p| {
                            (&p.left == row && &p.right == col) || (&p.left == col && &p.right == row)
                        })
                        .map(|p| p.coefficient)
                })
                .collect()
        })
        .collect()
}

/// Linear-interpolated quantile of already sorted values.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Least-squares line fitted over observation index, with projections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendEstimate {
    pub column: String,
    /// Column used to order the observations, if any
    pub ordered_by: Option<String>,
    pub observations: usize,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub last_observed: f64,
    pub projections: Vec<f64>,
}

impl fmt::Display for TrendEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Linear trend for '{}' over {} observations{}:",
            self.column,
            self.observations,
            self.ordered_by
                .as_ref()
                .map(|c| format!(" ordered by '{}'", c))
                .unwrap_or_default()
        )?;
        writeln!(
            f,
            "- slope per step: {:.4}, intercept: {:.4}, R²: {:.4}",
            self.slope, self.intercept, self.r_squared
        )?;
        writeln!(f, "- last observed value: {:.4}", self.last_observed)?;
        let projected: Vec<String> = self
            .projections
            .iter()
            .enumerate()
            .map(|(i, v)| format!("step +{}: {:.2}", i + 1, v))
            .collect();
        write!(f, "- projections: {}", projected.join(", "))
    }
}

/// Fit `value = intercept + slope * index` and extrapolate `horizon` steps.
pub fn linear_trend(column: &str, values: &[f64], horizon: usize) -> Result<TrendEstimate> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return Err(anyhow!(
            "At least two numeric observations are needed to estimate a trend for '{}'",
            column
        ));
    }

    let n = finite.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = finite.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in finite.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = finite.iter().map(|y| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = finite
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (intercept + slope * i as f64)).powi(2))
        .sum();
    let r_squared = if ss_tot.abs() < f64::EPSILON {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    let projections = (0..horizon)
        .map(|step| intercept + slope * (finite.len() + step) as f64)
        .collect();

    Ok(TrendEstimate {
        column: column.to_string(),
        ordered_by: None,
        observations: finite.len(),
        slope,
        intercept,
        r_squared,
        last_observed: finite[finite.len() - 1],
        projections,
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    #[default]
    Iqr,
    Zscore,
}

/// Z-score beyond which a value counts as an outlier
pub const ZSCORE_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnOutliers {
    pub column: String,
    pub count: usize,
    pub percentage: f64,
    /// Values outside these bounds are outliers (IQR method)
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    /// Set for the z-score method
    pub threshold: Option<f64>,
    /// Row positions of the flagged values, capped at 20
    pub rows: Vec<usize>,
}

impl fmt::Display for ColumnOutliers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}': {} outliers ({:.1}% of rows)",
            self.column, self.count, self.percentage
        )?;
        if let (Some(lo), Some(hi)) = (self.lower_bound, self.upper_bound) {
            write!(f, ", expected range [{:.4}, {:.4}]", lo, hi)?;
        }
        if let Some(threshold) = self.threshold {
            write!(f, ", |z| > {}", threshold)?;
        }
        Ok(())
    }
}

const MAX_REPORTED_ROWS: usize = 20;

/// Flag outliers in one column. Percentages are relative to all rows, nulls included.
pub fn detect_outliers(column: &str, values: &[Option<f64>], method: OutlierMethod) -> Option<ColumnOutliers> {
    let present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| x.is_finite()).map(|x| (i, x)))
        .collect();
    if present.is_empty() {
        return None;
    }

    let (flagged, lower_bound, upper_bound, threshold) = match method {
        OutlierMethod::Iqr => {
            let mut sorted: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let q1 = quantile_sorted(&sorted, 0.25)?;
            let q3 = quantile_sorted(&sorted, 0.75)?;
            let iqr = q3 - q1;
            let lower = q1 - 1.5 * iqr;
            let upper = q3 + 1.5 * iqr;
            let flagged: Vec<usize> = present
                .iter()
                .filter(|(_, v)| *v < lower || *v > upper)
                .map(|(i, _)| *i)
                .collect();
            (flagged, Some(lower), Some(upper), None)
        }
        OutlierMethod::Zscore => {
            let n = present.len() as f64;
            if present.len() < 2 {
                return None;
            }
            let mean = present.iter().map(|(_, v)| v).sum::<f64>() / n;
            let var = present.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let std = var.sqrt();
            if std < f64::EPSILON {
                return None;
            }
            let flagged: Vec<usize> = present
                .iter()
                .filter(|(_, v)| ((v - mean) / std).abs() > ZSCORE_THRESHOLD)
                .map(|(i, _)| *i)
                .collect();
            (flagged, None, None, Some(ZSCORE_THRESHOLD))
        }
    };

    Some(ColumnOutliers {
        column: column.to_string(),
        count: flagged.len(),
        percentage: flagged.len() as f64 / values.len() as f64 * 100.0,
        lower_bound,
        upper_bound,
        threshold,
        rows: flagged.into_iter().take(MAX_REPORTED_ROWS).collect(),
    })
}
