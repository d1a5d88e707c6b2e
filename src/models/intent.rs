use serde::{Deserialize, Serialize};
use std::fmt;

/// The inferred category of analysis the user is requesting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisIntent {
    Describe,
    Correlate,
    Anomaly,
    Forecast,
    Visualize,
    Freeform,
}

impl fmt::Display for AnalysisIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisIntent::Describe => "describe",
            AnalysisIntent::Correlate => "correlate",
            AnalysisIntent::Anomaly => "anomaly",
            AnalysisIntent::Forecast => "forecast",
            AnalysisIntent::Visualize => "visualize",
            AnalysisIntent::Freeform => "freeform",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    Histogram,
    Box,
    Pie,
    /// Pairwise correlation of numeric columns
    Heatmap,
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Scatter => "scatter",
            ChartKind::Histogram => "histogram",
            ChartKind::Box => "box",
            ChartKind::Pie => "pie",
            ChartKind::Heatmap => "heatmap",
        };
        f.write_str(name)
    }
}

/// Result of routing one user message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub intent: AnalysisIntent,
    /// Set only for `Visualize`
    pub chart_kind: Option<ChartKind>,
    /// Columns the analysis should focus on, most relevant first
    pub columns: Vec<String>,
    /// Forecast steps; set only for `Forecast`
    pub horizon: Option<usize>,
    /// Why the request was downgraded to freeform, if it was
    pub note: Option<String>,
}

impl Route {
    pub fn freeform() -> Self {
        Self {
            intent: AnalysisIntent::Freeform,
            chart_kind: None,
            columns: Vec::new(),
            horizon: None,
            note: None,
        }
    }

    pub fn downgraded(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::freeform()
        }
    }

    pub fn with_columns(intent: AnalysisIntent, columns: Vec<String>) -> Self {
        Self {
            intent,
            columns,
            ..Self::freeform()
        }
    }
}
