use std::fmt::Write as _;

use crate::config::ContextLimits;
use crate::models::chat::ChatTurn;
use crate::models::dataset::{ColumnKind, ColumnProfile, DatasetMetadata};
use crate::models::intent::Route;
use crate::models::prompt::{PromptContext, PromptTurn};
use crate::services::processor::Dataset;

const NO_DATASET: &str = "No dataset is loaded.";
const MIN_QUESTION_CHARS: usize = 256;

/// Assembles the bounded prompt for one model call.
///
/// Output depends only on its inputs: the same dataset, history and question
/// always produce the same `PromptContext`.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    limits: ContextLimits,
}

impl ContextBuilder {
    pub fn new(limits: ContextLimits) -> Self {
        Self { limits }
    }

    /// `history` holds the turns before `question`, oldest first. Error
    /// turns are left out; the model never sees its own failure messages.
    ///
    /// The result fits `max_prompt_chars`. Space is reclaimed in order: oldest
    /// history turns, summary columns, computed values, and finally the
    /// question itself, which keeps at least `MIN_QUESTION_CHARS`.
    pub fn build(
        &self,
        dataset: Option<&Dataset>,
        history: &[ChatTurn],
        route: &Route,
        question: &str,
        grounding: Option<String>,
        extra_notes: Vec<String>,
    ) -> PromptContext {
        let metadata = dataset.map(|d| d.metadata());
        let dataset_summary = match metadata {
            Some(meta) => self.summarize(meta),
            None => NO_DATASET.to_string(),
        };

        let answered: Vec<&ChatTurn> = history.iter().filter(|turn| !turn.is_error).collect();
        let window_start = answered.len().saturating_sub(self.limits.max_history_turns);
        let windowed: Vec<PromptTurn> = answered[window_start..]
            .iter()
            .map(|turn| PromptTurn {
                role: turn.role,
                text: clip(&turn.text, self.limits.max_turn_chars),
            })
            .collect();

        let mut notes: Vec<String> = route.note.iter().cloned().collect();
        notes.extend(extra_notes);

        let mut context = PromptContext {
            dataset_summary,
            history: windowed,
            intent: route.intent,
            question: question.to_string(),
            grounding,
            notes,
            dropped_turns: window_start,
        };
        self.fit_to_budget(&mut context, metadata);
        context
    }

    fn fit_to_budget(&self, context: &mut PromptContext, metadata: Option<&DatasetMetadata>) {
        let budget = self.limits.max_prompt_chars;

        while !context.history.is_empty() && context.rendered_len() > budget {
            context.history.remove(0);
            context.dropped_turns += 1;
        }

        if let Some(meta) = metadata {
            let mut shown = meta.columns.len().min(self.limits.max_summary_columns);
            while shown > 0 && context.rendered_len() > budget {
                shown -= 1;
                let correlations = self.limits.max_correlations.min(shown);
                context.dataset_summary = self.summarize_columns(meta, shown, correlations);
            }
        }

        let excess = context.rendered_len().saturating_sub(budget);
        if excess > 0 {
            if let Some(grounding) = &context.grounding {
                let keep = grounding.chars().count().saturating_sub(excess + 1);
                context.grounding = Some(clip(grounding, keep));
            }
        }

        let excess = context.rendered_len().saturating_sub(budget);
        if excess > 0 {
            let keep = context
                .question
                .chars()
                .count()
                .saturating_sub(excess + 1)
                .max(MIN_QUESTION_CHARS);
            context.question = clip(&context.question, keep);
        }
    }

    /// Deterministic description of the dataset. Never includes raw rows.
    pub fn summarize(&self, meta: &DatasetMetadata) -> String {
        self.summarize_columns(meta, self.limits.max_summary_columns, self.limits.max_correlations)
    }

    fn summarize_columns(&self, meta: &DatasetMetadata, max_columns: usize, max_correlations: usize) -> String {
        let width = self.limits.max_value_chars;
        let mut out = String::new();
        let _ = write!(out, "File: {}", clip(&meta.file_name, width));
        if let Some(sheet) = &meta.active_sheet {
            let _ = write!(out, " (sheet '{}')", clip(sheet, width));
        }
        let _ = write!(out, "\nRows: {}, Columns: {}\nColumns:", meta.row_count, meta.column_count);

        let shown = meta.columns.len().min(max_columns);
        for profile in &meta.columns[..shown] {
            out.push_str("\n- ");
            out.push_str(&describe_column(profile, width));
        }
        if meta.columns.len() > shown {
            let _ = write!(out, "\n… {} more columns omitted", meta.columns.len() - shown);
        }

        let mut pairs: Vec<_> = meta.correlations.iter().collect();
        pairs.sort_by(|a, b| {
            b.coefficient
                .abs()
                .total_cmp(&a.coefficient.abs())
                .then_with(|| a.left.cmp(&b.left))
                .then_with(|| a.right.cmp(&b.right))
        });
        pairs.truncate(max_correlations);
        if !pairs.is_empty() {
            out.push_str("\nStrongest correlations:");
            for pair in pairs {
                let _ = write!(
                    out,
                    "\n- {} ~ {}: r = {} (n = {})",
                    clip(&pair.left, width),
                    clip(&pair.right, width),
                    num(pair.coefficient),
                    pair.observations
                );
            }
        }
        out
    }
}

fn describe_column(profile: &ColumnProfile, width: usize) -> String {
    let mut line = format!(
        "{} ({}): {} nulls, {} unique",
        clip(&profile.name, width),
        profile.kind,
        profile.null_count,
        profile.unique_count
    );
    match profile.kind {
        ColumnKind::Numeric => {
            let stats = [
                ("mean", profile.mean),
                ("std", profile.std_dev),
                ("min", profile.min),
                ("p25", profile.percentile_25),
                ("median", profile.median),
                ("p75", profile.percentile_75),
                ("max", profile.max),
            ];
            for (label, value) in stats {
                if let Some(value) = value {
                    let _ = write!(line, ", {} {}", label, num(value));
                }
            }
        }
        ColumnKind::Datetime => {
            if let (Some(first), Some(last)) = (&profile.first_date, &profile.last_date) {
                let _ = write!(line, ", from {} to {}", first, last);
            }
        }
        ColumnKind::Categorical | ColumnKind::Text => {
            if !profile.top_values.is_empty() {
                let top: Vec<String> = profile
                    .top_values
                    .iter()
                    .take(5)
                    .map(|v| format!("{} ({})", clip(&v.value, width), v.count))
                    .collect();
                let _ = write!(line, ", top: {}", top.join(", "));
            }
        }
    }
    line
}

/// Fixed four-decimal rendering with trailing zeros removed
fn num(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::intent::AnalysisIntent;
    use crate::services::processor::DatasetProcessor;

    fn load(name: &str, csv: &str) -> Dataset {
        DatasetProcessor::new().load(name, csv.as_bytes(), None).unwrap()
    }

    fn sales() -> Dataset {
        load(
            "sales.csv",
            "date,region,sales,units\n2023-01-01,north,100,10\n2023-02-01,south,120,12\n2023-03-01,north,150,16\n",
        )
    }

    fn conversation(n: usize) -> Vec<ChatTurn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("question {}", i))
                } else {
                    ChatTurn::assistant(format!("answer {}", i), AnalysisIntent::Freeform, None)
                }
            })
            .collect()
    }

    #[test]
    fn test_history_is_windowed_to_most_recent_turns() {
        let builder = ContextBuilder::new(ContextLimits {
            max_history_turns: 4,
            ..ContextLimits::default()
        });
        let history = conversation(9);
        let ctx = builder.build(None, &history, &Route::freeform(), "what now?", None, Vec::new());

        assert_eq!(ctx.history.len(), 4);
        assert_eq!(ctx.dropped_turns, 5);
        assert_eq!(ctx.history[0].text, "answer 5");
        assert_eq!(ctx.history[3].text, "question 8");
        assert_eq!(ctx.question, "what now?");
    }

    #[test]
    fn test_long_turns_are_clipped() {
        let builder = ContextBuilder::new(ContextLimits {
            max_turn_chars: 10,
            ..ContextLimits::default()
        });
        let history = vec![ChatTurn::user("x".repeat(50))];
        let ctx = builder.build(None, &history, &Route::freeform(), "q", None, Vec::new());
        assert_eq!(ctx.history[0].text, format!("{}…", "x".repeat(10)));
    }

    #[test]
    fn test_prompt_budget_drops_oldest_turns_but_keeps_question() {
        let unbounded = ContextBuilder::new(ContextLimits::default());
        let history = conversation(6);
        let full = unbounded.build(None, &history, &Route::freeform(), "final question", None, Vec::new());
        let budget = full.rendered_len() - "question 0".len();

        let builder = ContextBuilder::new(ContextLimits {
            max_prompt_chars: budget,
            ..ContextLimits::default()
        });
        let ctx = builder.build(None, &history, &Route::freeform(), "final question", None, Vec::new());

        assert!(ctx.rendered_len() <= budget);
        assert_eq!(ctx.dropped_turns, 1);
        assert_eq!(ctx.history[0].text, "answer 1");
        assert!(ctx.render_request().ends_with("final question"));
    }

    #[test]
    fn test_question_survives_a_tiny_budget() {
        let builder = ContextBuilder::new(ContextLimits {
            max_prompt_chars: 1,
            ..ContextLimits::default()
        });
        let ctx = builder.build(Some(&sales()), &conversation(3), &Route::freeform(), "still here?", None, Vec::new());
        assert!(ctx.history.is_empty());
        assert_eq!(ctx.dropped_turns, 3);
        assert!(ctx.render_request().contains("still here?"));
    }

    #[test]
    fn test_long_category_values_stay_within_budget() {
        let mut csv = String::from("label,value\n");
        for (i, letter) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            csv.push_str(&format!("{},{}\n", letter.repeat(3000), i));
        }
        let ds = load("labels.csv", &csv);
        let limits = ContextLimits::default();
        let builder = ContextBuilder::new(limits.clone());

        let ctx = builder.build(Some(&ds), &conversation(4), &Route::freeform(), "which label is biggest?", None, Vec::new());

        assert!(ctx.rendered_len() <= limits.max_prompt_chars, "{}", ctx.rendered_len());
        assert_eq!(ctx.history.len(), 4);
        assert_eq!(ctx.dropped_turns, 0);
        assert!(ctx.dataset_summary.contains(&format!("{}… (1)", "a".repeat(80))));
        assert!(!ctx.dataset_summary.contains(&"a".repeat(81)));
    }

    #[test]
    fn test_wide_summary_is_trimmed_after_history() {
        let names: Vec<String> = (0..30)
            .map(|i| format!("measurement_{:02}_{}", i, "x".repeat(60)))
            .collect();
        let mut csv = names.join(",");
        csv.push('\n');
        for row in 1..=3 {
            let values: Vec<String> = (0..30).map(|i| (row * (i + 1)).to_string()).collect();
            csv.push_str(&values.join(","));
            csv.push('\n');
        }
        let ds = load("wide.csv", &csv);
        let builder = ContextBuilder::new(ContextLimits {
            max_prompt_chars: 1500,
            ..ContextLimits::default()
        });

        let ctx = builder.build(Some(&ds), &conversation(2), &Route::freeform(), "summarize", None, Vec::new());

        assert!(ctx.rendered_len() <= 1500, "{}", ctx.rendered_len());
        assert!(ctx.history.is_empty());
        assert_eq!(ctx.dropped_turns, 2);
        assert!(ctx.dataset_summary.contains("more columns omitted"));
        assert_eq!(ctx.question, "summarize");
    }

    #[test]
    fn test_oversized_grounding_and_question_are_clipped() {
        let builder = ContextBuilder::new(ContextLimits {
            max_prompt_chars: 2000,
            ..ContextLimits::default()
        });

        let ctx = builder.build(None, &[], &Route::freeform(), "short question", Some("g".repeat(5000)), Vec::new());
        assert_eq!(ctx.rendered_len(), 2000);
        assert!(ctx.grounding.as_deref().unwrap().ends_with('…'));
        assert_eq!(ctx.question, "short question");

        let long_question = "y".repeat(5000);
        let ctx = builder.build(None, &[], &Route::freeform(), &long_question, None, Vec::new());
        assert_eq!(ctx.rendered_len(), 2000);
        assert!(ctx.question.starts_with("yyyy"));
        assert!(ctx.question.ends_with('…'));
    }

    #[test]
    fn test_error_turns_are_not_replayed() {
        let builder = ContextBuilder::new(ContextLimits::default());
        let history = vec![
            ChatTurn::user("first"),
            ChatTurn::assistant_error("The model service is unavailable.", AnalysisIntent::Freeform),
            ChatTurn::user("again"),
            ChatTurn::assistant("Here you go", AnalysisIntent::Freeform, None),
        ];
        let ctx = builder.build(None, &history, &Route::freeform(), "thanks", None, Vec::new());

        let texts: Vec<&str> = ctx.history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "again", "Here you go"]);
        assert_eq!(ctx.dropped_turns, 0);
    }

    #[test]
    fn test_summary_is_deterministic_and_has_no_raw_rows() {
        let builder = ContextBuilder::new(ContextLimits::default());
        let ds = sales();
        let a = builder.build(Some(&ds), &[], &Route::freeform(), "q", None, Vec::new());
        let b = builder.build(Some(&ds), &[], &Route::freeform(), "q", None, Vec::new());
        assert_eq!(a, b);
        assert!(a.dataset_summary.contains("Rows: 3, Columns: 4"));
        assert!(a.dataset_summary.contains("sales (numeric)"));
        assert!(a.dataset_summary.contains("Strongest correlations:"));
        assert!(!a.dataset_summary.contains("2023-01-01,north"));
    }

    #[test]
    fn test_summary_caps_columns() {
        let builder = ContextBuilder::new(ContextLimits {
            max_summary_columns: 2,
            ..ContextLimits::default()
        });
        let summary = builder.summarize(sales().metadata());
        assert!(summary.contains("… 2 more columns omitted"), "{}", summary);
        assert!(!summary.contains("units (numeric)"));
    }

    #[test]
    fn test_replaced_dataset_leaves_no_stale_statistics() {
        let builder = ContextBuilder::new(ContextLimits::default());
        let before = builder.build(Some(&sales()), &[], &Route::freeform(), "q", None, Vec::new());
        assert!(before.dataset_summary.contains("sales"));

        let replaced = load("weather.csv", "city,temp\nOslo,3.5\nRome,18.25\nCairo,30\n");
        let after = builder.build(Some(&replaced), &[], &Route::freeform(), "q", None, Vec::new());
        assert!(after.dataset_summary.contains("weather.csv"));
        assert!(!after.dataset_summary.contains("sales"));
        assert!(!after.dataset_summary.contains("units"));
    }

    #[test]
    fn test_route_note_and_extra_notes_are_rendered() {
        let builder = ContextBuilder::new(ContextLimits::default());
        let route = Route::downgraded("No dataset is loaded yet.");
        let ctx = builder.build(None, &[], &route, "q", None, vec!["chart failed".to_string()]);
        assert_eq!(ctx.notes, vec!["No dataset is loaded yet.".to_string(), "chart failed".to_string()]);
        assert!(ctx.render_request().contains("Note: chart failed"));
    }

    #[test]
    fn test_num_trims_trailing_zeros() {
        assert_eq!(num(2.5), "2.5");
        assert_eq!(num(3.0), "3");
        assert_eq!(num(0.12346), "0.1235");
    }
}
