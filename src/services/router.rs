use crate::config::ForecastConfig;
use crate::models::dataset::{ColumnKind, DatasetMetadata};
use crate::models::intent::{AnalysisIntent, ChartKind, Route};

/// Trigger terms per intent, checked in this order. The first intent with a
/// matching term wins, so a message mentioning both a trend and a chart is a forecast.
const INTENT_RULES: &[(AnalysisIntent, &[&str])] = &[
    (
        AnalysisIntent::Forecast,
        &[
            "predict", "forecast", "projection", "project", "trend", "next", "future", "extrapolat",
            "预测", "趋势",
        ],
    ),
    (
        AnalysisIntent::Anomaly,
        &["outlier", "anomal", "unusual", "abnormal", "spike", "异常"],
    ),
    (
        AnalysisIntent::Correlate,
        &[
            "correlat", "relationship", "related", "relation", "association", "depend", "相关",
        ],
    ),
    (
        AnalysisIntent::Visualize,
        &[
            "chart", "plot", "graph", "visuali", "draw", "histogram", "scatter", "pie", "bar",
            "box", "line", "heatmap", "heat map", "图",
        ],
    ),
    (
        AnalysisIntent::Describe,
        &[
            "describe", "summary", "summari", "overview", "statistic", "stats", "distribution",
            "mean", "average", "median", "column", "描述", "统计",
        ],
    ),
];

/// Chart sub-classification for visualize requests, in priority order
const CHART_RULES: &[(ChartKind, &[&str])] = &[
    (ChartKind::Heatmap, HEATMAP_TERMS),
    (ChartKind::Histogram, &["histogram", "distribution"]),
    (ChartKind::Box, &["boxplot", "box plot", "box", "whisker"]),
    (ChartKind::Pie, &["pie", "share", "proportion"]),
    (ChartKind::Scatter, &["scatter"]),
    (ChartKind::Line, &["line", "time series", "over time"]),
    (ChartKind::Bar, &["bar", "column chart"]),
];

const HEATMAP_TERMS: &[&str] = &["heatmap", "heat map"];

/// Terms short enough to hide inside other words. These only match as whole
/// words (plural "s"/"es" allowed), so "online" is not a line chart.
const WHOLE_WORD_TERMS: &[&str] = &["bar", "box", "line", "mean", "next", "pie"];

const NO_DATASET_NOTE: &str = "No dataset is loaded yet, so this was answered without data analysis.";

/// Rule-based classifier from a chat message to an analysis route.
/// Pure: the same message and metadata always produce the same route.
#[derive(Clone, Debug)]
pub struct CapabilityRouter {
    forecast: ForecastConfig,
}

impl CapabilityRouter {
    pub fn new(forecast: ForecastConfig) -> Self {
        Self { forecast }
    }

    pub fn route(&self, message: &str, metadata: Option<&DatasetMetadata>) -> Route {
        let text = format!("{} ", message.to_lowercase());

        let intent = classify(&text);
        if intent == AnalysisIntent::Freeform {
            return Route::freeform();
        }

        let meta = match metadata {
            Some(meta) => meta,
            None => return Route::downgraded(NO_DATASET_NOTE),
        };

        let mentioned = mentioned_columns(&text, meta);

        match intent {
            AnalysisIntent::Forecast => self.route_forecast(&text, meta, &mentioned),
            AnalysisIntent::Anomaly => route_anomaly(meta, &mentioned),
            // "correlation heatmap" asks for the picture rather than the numbers
            AnalysisIntent::Correlate if mentions_any(&text, HEATMAP_TERMS) => {
                route_visualize(&text, meta, &mentioned)
            }
            AnalysisIntent::Correlate => route_correlate(meta, &mentioned),
            AnalysisIntent::Visualize => route_visualize(&text, meta, &mentioned),
            _ => Route::with_columns(AnalysisIntent::Describe, mentioned),
        }
    }

    fn route_forecast(&self, text: &str, meta: &DatasetMetadata, mentioned: &[String]) -> Route {
        let target = mentioned
            .iter()
            .find(|c| meta.is_kind(c, ColumnKind::Numeric))
            .cloned()
            .or_else(|| meta.numeric_columns().first().map(|c| c.to_string()));

        let target = match target {
            Some(target) => target,
            None => {
                return Route::downgraded(
                    "A forecast needs a numeric column and this dataset has none, so no trend was computed.",
                )
            }
        };

        let horizon = parse_horizon(text)
            .unwrap_or(self.forecast.default_horizon)
            .clamp(1, self.forecast.max_horizon.max(1));

        let mut columns = vec![target];
        if let Some(date) = meta.datetime_columns().first() {
            columns.push(date.to_string());
        }

        Route {
            horizon: Some(horizon),
            ..Route::with_columns(AnalysisIntent::Forecast, columns)
        }
    }
}

fn mentions_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| find_term(text, t).is_some())
}

fn classify(text: &str) -> AnalysisIntent {
    INTENT_RULES
        .iter()
        .find(|(_, terms)| mentions_any(text, terms))
        .map(|(intent, _)| *intent)
        .unwrap_or(AnalysisIntent::Freeform)
}

/// Column names appearing in the message, ordered by first appearance
fn mentioned_columns(text: &str, meta: &DatasetMetadata) -> Vec<String> {
    let mut found: Vec<(usize, usize, &str)> = meta
        .columns
        .iter()
        .filter_map(|c| {
            let needle = c.name.to_lowercase();
            if needle.is_empty() {
                return None;
            }
            text.find(&needle).map(|pos| (pos, usize::MAX - needle.len(), c.name.as_str()))
        })
        .collect();
    // Longer names first at the same position, so "sales_total" beats "sales"
    found.sort();

    let mut columns: Vec<String> = Vec::new();
    let mut covered_until = 0;
    for (pos, inv_len, name) in found {
        let len = usize::MAX - inv_len;
        if pos < covered_until {
            continue;
        }
        covered_until = pos + len;
        columns.push(name.to_string());
    }
    columns
}

/// Byte offset of the first match of `term` in `text`
fn find_term(text: &str, term: &str) -> Option<usize> {
    if !WHOLE_WORD_TERMS.contains(&term) {
        return text.find(term);
    }
    text.match_indices(term).map(|(pos, _)| pos).find(|&pos| {
        let starts_word = text[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let rest = &text[pos + term.len()..];
        let rest = rest
            .strip_prefix("es")
            .or_else(|| rest.strip_prefix('s'))
            .unwrap_or(rest);
        let ends_word = rest.chars().next().map_or(true, |c| !c.is_alphanumeric());
        starts_word && ends_word
    })
}

fn parse_horizon(text: &str) -> Option<usize> {
    let idx = find_term(text, "next")?;
    let word = text[idx + "next".len()..].split_whitespace().next()?;
    let digits = word.trim_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // More digits than usize holds still asks for the longest horizon
    Some(digits.parse().unwrap_or(usize::MAX))
}

fn numeric_selection(meta: &DatasetMetadata, mentioned: &[String]) -> Vec<String> {
    let chosen: Vec<String> = mentioned
        .iter()
        .filter(|c| meta.is_kind(c, ColumnKind::Numeric))
        .cloned()
        .collect();
    if chosen.is_empty() {
        meta.numeric_columns().iter().map(|c| c.to_string()).collect()
    } else {
        chosen
    }
}

fn route_anomaly(meta: &DatasetMetadata, mentioned: &[String]) -> Route {
    let columns = numeric_selection(meta, mentioned);
    if columns.is_empty() {
        return Route::downgraded(
            "Outlier detection needs a numeric column and this dataset has none.",
        );
    }
    Route::with_columns(AnalysisIntent::Anomaly, columns)
}

fn route_correlate(meta: &DatasetMetadata, mentioned: &[String]) -> Route {
    if meta.numeric_columns().len() < 2 {
        return Route::downgraded(
            "Correlation needs at least two numeric columns, so no coefficients were computed.",
        );
    }
    let mut columns = numeric_selection(meta, mentioned);
    // A single named column is correlated against every other numeric column
    if columns.len() == 1 {
        columns = meta.numeric_columns().iter().map(|c| c.to_string()).collect();
        if let Some(named) = mentioned.iter().find(|c| meta.is_kind(c, ColumnKind::Numeric)) {
            columns.retain(|c| c != named);
            columns.insert(0, named.clone());
        }
    }
    Route::with_columns(AnalysisIntent::Correlate, columns)
}

fn route_visualize(text: &str, meta: &DatasetMetadata, mentioned: &[String]) -> Route {
    let numeric = meta.numeric_columns();
    let dates = meta.datetime_columns();
    let categories = meta.categorical_columns();

    let kind = CHART_RULES
        .iter()
        .find(|(_, terms)| mentions_any(text, terms))
        .map(|(kind, _)| *kind)
        .unwrap_or(if !dates.is_empty() && !numeric.is_empty() {
            ChartKind::Line
        } else if !numeric.is_empty() {
            ChartKind::Histogram
        } else {
            ChartKind::Bar
        });

    let pick = |kind: ColumnKind, fallback: &[&str], skip: Option<&str>| -> Option<String> {
        mentioned
            .iter()
            .find(|c| meta.is_kind(c, kind) && Some(c.as_str()) != skip)
            .cloned()
            .or_else(|| {
                fallback
                    .iter()
                    .find(|c| Some(**c) != skip)
                    .map(|c| c.to_string())
            })
    };

    let columns: Option<Vec<String>> = match kind {
        ChartKind::Histogram => pick(ColumnKind::Numeric, &numeric, None).map(|y| vec![y]),
        ChartKind::Box => pick(ColumnKind::Numeric, &numeric, None).map(|y| {
            let mut cols = vec![y];
            if let Some(group) = mentioned.iter().find(|c| meta.is_kind(c, ColumnKind::Categorical)) {
                cols.push(group.clone());
            }
            cols
        }),
        ChartKind::Scatter => pick(ColumnKind::Numeric, &numeric, None).and_then(|x| {
            pick(ColumnKind::Numeric, &numeric, Some(x.as_str())).map(|y| vec![x, y])
        }),
        ChartKind::Line => {
            let y = pick(ColumnKind::Numeric, &numeric, None);
            let x = pick(ColumnKind::Datetime, &dates, None);
            match (x, y) {
                (Some(x), Some(y)) => Some(vec![x, y]),
                (None, Some(y)) => Some(vec![y]),
                _ => None,
            }
        }
        ChartKind::Bar | ChartKind::Pie => {
            let names = pick(ColumnKind::Categorical, &categories, None);
            let values = pick(ColumnKind::Numeric, &numeric, None);
            match (names, values) {
                (Some(n), Some(v)) => Some(vec![n, v]),
                (Some(n), None) => Some(vec![n]),
                _ => None,
            }
        }
        ChartKind::Heatmap => {
            let named: Vec<String> = mentioned
                .iter()
                .filter(|c| meta.is_kind(c, ColumnKind::Numeric))
                .cloned()
                .collect();
            let columns = if named.len() >= 2 {
                named
            } else {
                numeric.iter().map(|c| c.to_string()).collect()
            };
            (columns.len() >= 2).then_some(columns)
        }
    };

    match columns {
        Some(columns) => Route {
            chart_kind: Some(kind),
            ..Route::with_columns(AnalysisIntent::Visualize, columns)
        },
        None => Route::downgraded(format!(
            "A {} chart needs columns this dataset doesn't have, so no chart was drawn.",
            kind
        )),
    }
}
