use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::collections::HashMap;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::models::chat::ChartReference;
use crate::models::dataset::ColumnKind;
use crate::models::intent::ChartKind;
use crate::models::response::ChartRequest;
use crate::services::analytics::{calculate_correlation, correlation_matrix, quantile_sorted};
use crate::services::processor::Dataset;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 480;
const MARGIN: i32 = 16;
const X_LABEL_AREA: i32 = 48;
const Y_LABEL_AREA: i32 = 72;
const CAPTION_SIZE: u32 = 22;
const LABEL_SIZE: u32 = 13;
/// Longest category name printed on an axis or legend
const MAX_LABEL_CHARS: usize = 18;
pub const DEFAULT_BINS: usize = 30;
pub const MIN_BINS: usize = 5;
pub const MAX_BINS: usize = 100;
const MAX_BAR_CATEGORIES: usize = 20;
const MAX_PIE_SLICES: usize = 8;
const MAX_BOX_GROUPS: usize = 12;
const MAX_HEATMAP_COLUMNS: usize = 15;
/// Coefficients are printed inside cells only up to this many columns
const MAX_ANNOTATED_COLUMNS: usize = 10;

/// What to draw
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub columns: Vec<String>,
    pub bins: Option<usize>,
}

impl From<ChartRequest> for ChartSpec {
    fn from(request: ChartRequest) -> Self {
        Self {
            kind: request.kind,
            columns: request.columns,
            bins: request.bins,
        }
    }
}

/// A drawn chart: the reference stored on chat turns, the SVG body, and a
/// plain-text description of what was plotted for the model to narrate.
#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub reference: ChartReference,
    pub svg: String,
    pub summary: String,
}

impl RenderedChart {
    pub fn data_uri(&self) -> String {
        format!("data:image/svg+xml;base64,{}", STANDARD.encode(self.svg.as_bytes()))
    }
}

/// Renders charts from dataset columns as SVG
#[derive(Clone, Debug, Default)]
pub struct Visualizer;

impl Visualizer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, dataset: &Dataset, spec: &ChartSpec) -> Result<RenderedChart> {
        let meta = dataset.metadata();
        for column in &spec.columns {
            if meta.column(column).is_none() {
                bail!("Unknown column '{}'", column);
            }
        }
        let mut columns = spec.columns.clone();

        let (title, svg, summary) = match spec.kind {
            ChartKind::Histogram => {
                let column = required(spec, 0, "histogram needs a numeric column")?;
                let bins = spec.bins.unwrap_or(DEFAULT_BINS).clamp(MIN_BINS, MAX_BINS);
                let values = present(dataset.numeric_values(column)?);
                let title = format!("Distribution of {}", column);
                let (svg, summary) = histogram(&title, column, &values, bins)?;
                (title, svg, summary)
            }
            ChartKind::Box => {
                let column = required(spec, 0, "box plot needs a numeric column")?;
                let values = dataset.numeric_values(column)?;
                let group = spec.columns.get(1).map(|g| g.as_str());
                let groups = match group {
                    Some(group) => grouped(&dataset.text_values(group)?, &values, MAX_BOX_GROUPS),
                    None => vec![(column.to_string(), present(values))],
                };
                let title = match group {
                    Some(group) => format!("{} by {}", column, group),
                    None => format!("Spread of {}", column),
                };
                let (svg, summary) = box_plot(&title, column, group, &groups)?;
                (title, svg, summary)
            }
            ChartKind::Scatter => {
                let x = required(spec, 0, "scatter plot needs two numeric columns")?;
                let y = required(spec, 1, "scatter plot needs two numeric columns")?;
                let title = format!("{} vs {}", y, x);
                let (svg, summary) = scatter(&title, x, y, &dataset.numeric_values(x)?, &dataset.numeric_values(y)?)?;
                (title, svg, summary)
            }
            ChartKind::Line => {
                let (x, y) = match spec.columns.as_slice() {
                    [y] => (None, y.as_str()),
                    [x, y, ..] => (Some(x.as_str()), y.as_str()),
                    [] => bail!("line chart needs a numeric column"),
                };
                let ys = dataset.numeric_values(y)?;
                let xs = match x {
                    Some(x) if meta.is_kind(x, ColumnKind::Datetime) => XAxis::Time(dataset.datetime_values(x)?),
                    Some(x) => XAxis::Numeric(dataset.numeric_values(x)?),
                    None => XAxis::Index,
                };
                let title = match x {
                    Some(x) => format!("{} over {}", y, x),
                    None => format!("{} by row", y),
                };
                let (svg, summary) = line(&title, x, y, &xs, &ys)?;
                (title, svg, summary)
            }
            ChartKind::Bar | ChartKind::Pie => {
                let names = required(spec, 0, "chart needs a category column")?;
                let labels = dataset.text_values(names)?;
                let values = match spec.columns.get(1) {
                    Some(v) => Some(dataset.numeric_values(v)?),
                    None => None,
                };
                let totals = category_totals(&labels, values.as_deref());
                let measure = spec.columns.get(1).map(|v| v.as_str()).unwrap_or("count");
                if spec.kind == ChartKind::Bar {
                    let title = format!("{} by {}", measure, names);
                    let (svg, summary) = bar(&title, names, measure, &totals)?;
                    (title, svg, summary)
                } else {
                    let title = format!("Share of {} by {}", measure, names);
                    let (svg, summary) = pie(&title, names, measure, &totals)?;
                    (title, svg, summary)
                }
            }
            ChartKind::Heatmap => {
                if columns.is_empty() {
                    columns = meta.numeric_columns().iter().map(|c| c.to_string()).collect();
                }
                if let Some(other) = columns.iter().find(|c| !meta.is_kind(c, ColumnKind::Numeric)) {
                    bail!("'{}' is not a numeric column", other);
                }
                if columns.len() < 2 {
                    bail!("heatmap needs at least two numeric columns");
                }
                columns.truncate(MAX_HEATMAP_COLUMNS);
                let matrix = correlation_matrix(meta, &columns);
                let title = "Correlation heatmap".to_string();
                let (svg, summary) = heatmap(&title, &columns, &matrix)?;
                (title, svg, summary)
            }
        };

        Ok(RenderedChart {
            reference: ChartReference {
                id: Uuid::new_v4(),
                kind: spec.kind,
                title,
                columns,
            },
            svg,
            summary,
        })
    }
}

enum XAxis {
    Index,
    Numeric(Vec<Option<f64>>),
    Time(Vec<Option<NaiveDateTime>>),
}

fn required<'a>(spec: &'a ChartSpec, idx: usize, msg: &str) -> Result<&'a str> {
    spec.columns
        .get(idx)
        .map(|c| c.as_str())
        .ok_or_else(|| anyhow!("{}", msg))
}

fn present(values: Vec<Option<f64>>) -> Vec<f64> {
    values.into_iter().flatten().filter(|v| v.is_finite()).collect()
}

fn draw_err<E: std::fmt::Display>(e: E) -> anyhow::Error {
    anyhow!("Failed to draw chart: {}", e)
}

/// Pads a degenerate or tight range so every mark stays inside the plot
fn padded(min: f64, max: f64) -> std::ops::Range<f64> {
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0)..(max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad)..(max + pad)
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn short_label(label: &str) -> String {
    if label.chars().count() <= MAX_LABEL_CHARS {
        return label.to_string();
    }
    let mut short: String = label.chars().take(MAX_LABEL_CHARS - 1).collect();
    short.push('…');
    short
}

/// Name of the category centred on `x`; empty between categories.
/// Categorical axes place category `i` at `x = i`.
fn category_label(names: &[String], x: f64) -> String {
    let idx = x.round();
    if (x - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    names.get(idx as usize).map(|n| short_label(n)).unwrap_or_default()
}

fn category_range(count: usize) -> std::ops::Range<f64> {
    -0.5..(count as f64 - 0.5)
}

/// Days since the epoch back to a calendar date
fn day_label(days: f64) -> String {
    DateTime::from_timestamp((days * 86_400.0).round() as i64, 0)
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn centered_text() -> TextStyle<'static> {
    TextStyle::from(("sans-serif", LABEL_SIZE).into_font()).pos(Pos::new(HPos::Center, VPos::Center))
}

fn render_svg<F>(draw: F) -> Result<String>
where
    F: FnOnce(&DrawingArea<SVGBackend<'_>, Shift>) -> Result<()>,
{
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        draw(&root)?;
        root.present().map_err(draw_err)?;
    }
    Ok(svg)
}

fn histogram(title: &str, column: &str, values: &[f64], bins: usize) -> Result<(String, String)> {
    let (lo, hi) = bounds(values.iter().copied())
        .ok_or_else(|| anyhow!("'{}' has no numeric values to plot", column))?;
    let (lo, hi) = if (hi - lo).abs() < f64::EPSILON { (lo - 0.5, hi + 0.5) } else { (lo, hi) };
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0usize; bins];
    for v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let tallest = counts.iter().copied().max().unwrap_or(0);

    let svg = render_svg(|root| {
        let mut chart = ChartBuilder::on(root)
            .caption(title, ("sans-serif", CAPTION_SIZE))
            .margin(MARGIN)
            .x_label_area_size(X_LABEL_AREA)
            .y_label_area_size(Y_LABEL_AREA)
            .build_cartesian_2d(lo..hi, 0.0..(tallest as f64 * 1.05).max(1.0))
            .map_err(draw_err)?;
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(column)
            .y_desc("count")
            .label_style(("sans-serif", LABEL_SIZE))
            .draw()
            .map_err(draw_err)?;
        chart
            .draw_series(counts.iter().enumerate().map(|(i, c)| {
                let x0 = lo + i as f64 * width;
                Rectangle::new([(x0, 0.0), (x0 + width, *c as f64)], BLUE.mix(0.7).filled())
            }))
            .map_err(draw_err)?;
        Ok(())
    })?;

    let peak = counts.iter().position(|c| *c == tallest).unwrap_or(0);
    let summary = format!(
        "Histogram of '{}': {} values in {} bins over [{:.4}, {:.4}]; the fullest bin [{:.4}, {:.4}) holds {} values.",
        column,
        values.len(),
        bins,
        lo,
        hi,
        lo + peak as f64 * width,
        lo + (peak + 1) as f64 * width,
        tallest
    );
    Ok((svg, summary))
}

/// Groups numeric values by label, keeping the first `limit` labels seen
fn grouped(labels: &[Option<String>], values: &[Option<f64>], limit: usize) -> Vec<(String, Vec<f64>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
    for (label, value) in labels.iter().zip(values.iter()) {
        let (Some(label), Some(value)) = (label, value) else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        if !groups.contains_key(label) {
            if order.len() >= limit {
                continue;
            }
            order.push(label.clone());
        }
        groups.entry(label.clone()).or_default().push(*value);
    }
    order
        .into_iter()
        .map(|label| {
            let values = groups.remove(&label).unwrap_or_default();
            (label, values)
        })
        .collect()
}

struct BoxStats {
    low: f64,
    q1: f64,
    median: f64,
    q3: f64,
    high: f64,
}

fn box_stats(values: &[f64]) -> Option<BoxStats> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile_sorted(&sorted, 0.25)?;
    let median = quantile_sorted(&sorted, 0.5)?;
    let q3 = quantile_sorted(&sorted, 0.75)?;
    let iqr = q3 - q1;
    let low = sorted.iter().copied().find(|v| *v >= q1 - 1.5 * iqr).unwrap_or(q1);
    let high = sorted.iter().rev().copied().find(|v| *v <= q3 + 1.5 * iqr).unwrap_or(q3);
    Some(BoxStats { low, q1, median, q3, high })
}

fn box_plot(
    title: &str,
    column: &str,
    group: Option<&str>,
    groups: &[(String, Vec<f64>)],
) -> Result<(String, String)> {
    let stats: Vec<(&str, BoxStats)> = groups
        .iter()
        .filter_map(|(label, values)| box_stats(values).map(|s| (label.as_str(), s)))
        .collect();
    if stats.is_empty() {
        bail!("'{}' has no numeric values to plot", column);
    }

    let (lo, hi) = bounds(groups.iter().flat_map(|(_, v)| v.iter().copied()))
        .ok_or_else(|| anyhow!("'{}' has no numeric values to plot", column))?;
    let names: Vec<String> = stats.iter().map(|(label, _)| label.to_string()).collect();

    let svg = render_svg(|root| {
        let mut chart = ChartBuilder::on(root)
            .caption(title, ("sans-serif", CAPTION_SIZE))
            .margin(MARGIN)
            .x_label_area_size(X_LABEL_AREA)
            .y_label_area_size(Y_LABEL_AREA)
            .build_cartesian_2d(category_range(names.len()), padded(lo, hi))
            .map_err(draw_err)?;
        let label_of = |x: &f64| category_label(&names, *x);
        let mut mesh = chart.configure_mesh();
        mesh.disable_x_mesh()
            .x_labels(names.len())
            .x_label_formatter(&label_of)
            .y_desc(column)
            .label_style(("sans-serif", LABEL_SIZE));
        if let Some(group) = group {
            mesh.x_desc(group);
        }
        mesh.draw().map_err(draw_err)?;

        for (i, (_, s)) in stats.iter().enumerate() {
            let center = i as f64;
            let color = Palette99::pick(i);
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(center - 0.3, s.q1), (center + 0.3, s.q3)],
                    color.mix(0.6).filled(),
                )))
                .map_err(draw_err)?;
            chart
                .draw_series(vec![
                    PathElement::new(vec![(center - 0.3, s.median), (center + 0.3, s.median)], BLACK.stroke_width(2)),
                    PathElement::new(vec![(center, s.q3), (center, s.high)], BLACK.stroke_width(1)),
                    PathElement::new(vec![(center, s.q1), (center, s.low)], BLACK.stroke_width(1)),
                    PathElement::new(vec![(center - 0.15, s.high), (center + 0.15, s.high)], BLACK.stroke_width(1)),
                    PathElement::new(vec![(center - 0.15, s.low), (center + 0.15, s.low)], BLACK.stroke_width(1)),
                ])
                .map_err(draw_err)?;
        }
        Ok(())
    })?;

    let mut summary = format!("Box plot of '{}':", column);
    for (label, s) in &stats {
        let _ = write!(
            summary,
            "\n- {}: median {:.4}, quartiles [{:.4}, {:.4}], whiskers [{:.4}, {:.4}]",
            label, s.median, s.q1, s.q3, s.low, s.high
        );
    }
    Ok((svg, summary))
}

fn scatter(title: &str, x: &str, y: &str, xs: &[Option<f64>], ys: &[Option<f64>]) -> Result<(String, String)> {
    let points: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys.iter())
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .collect();
    let (x_lo, x_hi) = bounds(points.iter().map(|p| p.0))
        .ok_or_else(|| anyhow!("'{}' and '{}' have no complete pairs to plot", x, y))?;
    let (y_lo, y_hi) = bounds(points.iter().map(|p| p.1)).unwrap_or((0.0, 0.0));

    let svg = render_svg(|root| {
        let mut chart = ChartBuilder::on(root)
            .caption(title, ("sans-serif", CAPTION_SIZE))
            .margin(MARGIN)
            .x_label_area_size(X_LABEL_AREA)
            .y_label_area_size(Y_LABEL_AREA)
            .build_cartesian_2d(padded(x_lo, x_hi), padded(y_lo, y_hi))
            .map_err(draw_err)?;
        chart
            .configure_mesh()
            .x_desc(x)
            .y_desc(y)
            .label_style(("sans-serif", LABEL_SIZE))
            .draw()
            .map_err(draw_err)?;
        chart
            .draw_series(points.iter().map(|p| Circle::new(*p, 3, BLUE.mix(0.7).filled())))
            .map_err(draw_err)?;
        Ok(())
    })?;

    let mut summary = format!(
        "Scatter of '{}' (y) against '{}' (x): {} points, x in [{:.4}, {:.4}], y in [{:.4}, {:.4}]",
        y,
        x,
        points.len(),
        x_lo,
        x_hi,
        y_lo,
        y_hi
    );
    if let Ok((r, _)) = calculate_correlation(xs, ys) {
        let _ = write!(summary, ", Pearson r = {:.4}", r);
    }
    summary.push('.');
    Ok((svg, summary))
}

fn line(title: &str, x: Option<&str>, y: &str, xs: &XAxis, ys: &[Option<f64>]) -> Result<(String, String)> {
    let mut points: Vec<(f64, f64)> = match xs {
        XAxis::Index => ys
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
            .collect(),
        XAxis::Numeric(xs) => xs
            .iter()
            .zip(ys.iter())
            .filter_map(|(a, b)| a.zip(*b))
            .collect(),
        // Days since the epoch keep the axis linear in time
        XAxis::Time(xs) => xs
            .iter()
            .zip(ys.iter())
            .filter_map(|(a, b)| a.map(|t| t.and_utc().timestamp() as f64 / 86_400.0).zip(*b))
            .collect(),
    };
    points.retain(|(a, b)| a.is_finite() && b.is_finite());
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (x_lo, x_hi) = bounds(points.iter().map(|p| p.0))
        .ok_or_else(|| anyhow!("'{}' has no values to plot", y))?;
    let (y_lo, y_hi) = bounds(points.iter().map(|p| p.1)).unwrap_or((0.0, 0.0));
    let is_time = matches!(xs, XAxis::Time(_));

    let svg = render_svg(|root| {
        let mut chart = ChartBuilder::on(root)
            .caption(title, ("sans-serif", CAPTION_SIZE))
            .margin(MARGIN)
            .x_label_area_size(X_LABEL_AREA)
            .y_label_area_size(Y_LABEL_AREA)
            .build_cartesian_2d(padded(x_lo, x_hi), padded(y_lo, y_hi))
            .map_err(draw_err)?;
        let date_of = |days: &f64| day_label(*days);
        let mut mesh = chart.configure_mesh();
        mesh.x_desc(x.unwrap_or("row"))
            .y_desc(y)
            .label_style(("sans-serif", LABEL_SIZE));
        if is_time {
            mesh.x_labels(6).x_label_formatter(&date_of);
        }
        mesh.draw().map_err(draw_err)?;

        chart
            .draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(2)))
            .map_err(draw_err)?;
        chart
            .draw_series(points.iter().map(|p| Circle::new(*p, 2, BLUE.filled())))
            .map_err(draw_err)?;
        Ok(())
    })?;

    let first = points.first().map(|p| p.1).unwrap_or_default();
    let last = points.last().map(|p| p.1).unwrap_or_default();
    let summary = format!(
        "Line of '{}': {} points, first {:.4}, last {:.4}, min {:.4}, max {:.4}.",
        y,
        points.len(),
        first,
        last,
        y_lo,
        y_hi
    );
    Ok((svg, summary))
}

/// Sum of `values` (or row count when absent) per label, largest first
fn category_totals(labels: &[Option<String>], values: Option<&[Option<f64>]>) -> Vec<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, f64> = HashMap::new();
    for (i, label) in labels.iter().enumerate() {
        let Some(label) = label else { continue };
        let amount = match values {
            Some(values) => match values.get(i).copied().flatten() {
                Some(v) if v.is_finite() => v,
                _ => continue,
            },
            None => 1.0,
        };
        if !totals.contains_key(label) {
            order.push(label.clone());
        }
        *totals.entry(label.clone()).or_insert(0.0) += amount;
    }
    let mut ranked: Vec<(String, f64)> = order
        .into_iter()
        .map(|label| {
            let total = totals.get(&label).copied().unwrap_or_default();
            (label, total)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

fn bar(title: &str, names: &str, measure: &str, totals: &[(String, f64)]) -> Result<(String, String)> {
    if totals.is_empty() {
        bail!("'{}' has no values to plot", names);
    }
    let shown = &totals[..totals.len().min(MAX_BAR_CATEGORIES)];
    let (lo, hi) = bounds(shown.iter().map(|(_, v)| *v)).unwrap_or((0.0, 0.0));
    let labels: Vec<String> = shown.iter().map(|(label, _)| label.clone()).collect();

    let svg = render_svg(|root| {
        let mut chart = ChartBuilder::on(root)
            .caption(title, ("sans-serif", CAPTION_SIZE))
            .margin(MARGIN)
            .x_label_area_size(X_LABEL_AREA)
            .y_label_area_size(Y_LABEL_AREA)
            .build_cartesian_2d(category_range(labels.len()), padded(lo.min(0.0), hi.max(0.0)))
            .map_err(draw_err)?;
        let label_of = |x: &f64| category_label(&labels, *x);
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(labels.len())
            .x_label_formatter(&label_of)
            .x_desc(names)
            .y_desc(measure)
            .label_style(("sans-serif", LABEL_SIZE))
            .draw()
            .map_err(draw_err)?;
        chart
            .draw_series(shown.iter().enumerate().map(|(i, (_, v))| {
                let x = i as f64;
                Rectangle::new([(x - 0.4, 0.0), (x + 0.4, *v)], Palette99::pick(i).filled())
            }))
            .map_err(draw_err)?;
        Ok(())
    })?;

    let mut summary = format!("Bar chart of {} by '{}' ({} categories", measure, names, totals.len());
    if totals.len() > shown.len() {
        let _ = write!(summary, ", top {} shown", shown.len());
    }
    summary.push_str("):");
    for (label, v) in shown {
        let _ = write!(summary, "\n- {}: {:.4}", label, v);
    }
    Ok((svg, summary))
}

fn pie(title: &str, names: &str, measure: &str, totals: &[(String, f64)]) -> Result<(String, String)> {
    if totals.iter().any(|(_, v)| *v < 0.0) {
        bail!("pie chart needs non-negative values in {}", measure);
    }
    let mut slices: Vec<(String, f64)> = totals.iter().take(MAX_PIE_SLICES).cloned().collect();
    let rest: f64 = totals.iter().skip(MAX_PIE_SLICES).map(|(_, v)| *v).sum();
    if rest > 0.0 {
        slices.push(("other".to_string(), rest));
    }
    let total: f64 = slices.iter().map(|(_, v)| *v).sum();
    if total <= 0.0 {
        bail!("'{}' has nothing to chart", names);
    }

    let svg = render_svg(|root| {
        // Wider than tall on the right so the legend clears the pie
        let mut chart = ChartBuilder::on(root)
            .caption(title, ("sans-serif", CAPTION_SIZE))
            .margin(MARGIN)
            .build_cartesian_2d(-1.2f64..2.8f64, -1.2f64..1.2f64)
            .map_err(draw_err)?;
        let mut start = 0.0f64;
        for (i, (label, v)) in slices.iter().enumerate() {
            let share = v / total;
            let sweep = share * std::f64::consts::TAU;
            let steps = ((sweep / 0.05).ceil() as usize).max(1);
            let mut outline = vec![(0.0, 0.0)];
            for step in 0..=steps {
                let angle = start + sweep * step as f64 / steps as f64;
                outline.push((angle.cos(), angle.sin()));
            }
            let color = Palette99::pick(i);
            chart
                .draw_series(std::iter::once(Polygon::new(outline, color.filled())))
                .map_err(draw_err)?
                .label(format!("{} ({:.1}%)", short_label(label), share * 100.0))
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));

            // Thin slices keep their share in the legend only
            if share >= 0.04 {
                let mid = start + sweep / 2.0;
                chart
                    .draw_series(std::iter::once(Text::new(
                        format!("{:.0}%", share * 100.0),
                        (0.65 * mid.cos(), 0.65 * mid.sin()),
                        centered_text(),
                    )))
                    .map_err(draw_err)?;
            }
            start += sweep;
        }
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .label_font(("sans-serif", LABEL_SIZE))
            .draw()
            .map_err(draw_err)?;
        Ok(())
    })?;

    let mut summary = format!("Pie chart of {} by '{}':", measure, names);
    for (label, v) in &slices {
        let _ = write!(summary, "\n- {}: {:.4} ({:.1}%)", label, v, v / total * 100.0);
    }
    Ok((svg, summary))
}

/// White at zero, red towards +1, blue towards -1
fn diverging(r: f64) -> RGBColor {
    let t = r.clamp(-1.0, 1.0).abs();
    let (red, green, blue) = if r >= 0.0 { (214.0, 39.0, 40.0) } else { (31.0, 119.0, 180.0) };
    let mix = |end: f64| (255.0 + (end - 255.0) * t).round() as u8;
    RGBColor(mix(red), mix(green), mix(blue))
}

fn heatmap(title: &str, columns: &[String], matrix: &[Vec<Option<f64>>]) -> Result<(String, String)> {
    let n = columns.len();
    let annotate = n <= MAX_ANNOTATED_COLUMNS;

    let svg = render_svg(|root| {
        let mut chart = ChartBuilder::on(root)
            .caption(title, ("sans-serif", CAPTION_SIZE))
            .margin(MARGIN)
            .x_label_area_size(X_LABEL_AREA)
            .y_label_area_size(Y_LABEL_AREA + 48)
            .build_cartesian_2d(category_range(n), category_range(n))
            .map_err(draw_err)?;
        let label_of = |v: &f64| category_label(columns, *v);
        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(n)
            .y_labels(n)
            .x_label_formatter(&label_of)
            .y_label_formatter(&label_of)
            .label_style(("sans-serif", LABEL_SIZE))
            .draw()
            .map_err(draw_err)?;

        for (row, values) in matrix.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                let (x, y) = (col as f64, row as f64);
                let fill = match value {
                    Some(r) => diverging(*r),
                    None => RGBColor(220, 220, 220),
                };
                chart
                    .draw_series(std::iter::once(Rectangle::new(
                        [(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)],
                        fill.filled(),
                    )))
                    .map_err(draw_err)?;
                if annotate {
                    let text = value.map(|r| format!("{:.2}", r)).unwrap_or_else(|| "n/a".to_string());
                    chart
                        .draw_series(std::iter::once(Text::new(text, (x, y), centered_text())))
                        .map_err(draw_err)?;
                }
            }
        }
        Ok(())
    })?;

    let mut summary = format!("Correlation heatmap of {} numeric columns:", n);
    for (i, left) in columns.iter().enumerate() {
        for (j, right) in columns.iter().enumerate().skip(i + 1) {
            match matrix.get(i).and_then(|row| row.get(j)).copied().flatten() {
                Some(r) => {
                    let _ = write!(summary, "\n- {} ~ {}: r = {:.4}", left, right, r);
                }
                None => {
                    let _ = write!(summary, "\n- {} ~ {}: no coefficient", left, right);
                }
            }
        }
    }
    Ok((svg, summary))
}
