use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{info, warn};
use uuid::Uuid;

use crate::config::{ContextLimits, RetryPolicy};
use crate::error::AnalysisError;
use crate::models::chat::ChatTurn;
use crate::models::intent::{AnalysisIntent, ChartKind, Route};
use crate::models::request::RequestState;
use crate::services::ai::ModelClient;
use crate::services::analytics::{
    calculate_correlation, detect_outliers, linear_trend, OutlierMethod, TrendEstimate,
};
use crate::services::charts::{ChartSpec, RenderedChart, Visualizer};
use crate::services::context::ContextBuilder;
use crate::services::processor::Dataset;

/// Everything one analysis needs, borrowed from the session
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub session_id: Uuid,
    pub api_key: &'a str,
    pub dataset: Option<&'a Dataset>,
    /// Turns before `question`, oldest first
    pub history: &'a [ChatTurn],
    pub route: &'a Route,
    pub question: &'a str,
}

/// Terminal result of one analysis request
#[derive(Debug)]
pub struct DispatchOutcome {
    pub state: RequestState,
    /// Every state the request passed through, in order
    pub transitions: Vec<RequestState>,
    /// Model calls made
    pub attempts: u32,
    pub reply: Result<String, AnalysisError>,
    pub chart: Option<RenderedChart>,
}

/// Values computed locally before the model is called
#[derive(Debug, Default)]
struct Grounding {
    text: Option<String>,
    notes: Vec<String>,
    chart: Option<RenderedChart>,
}

/// Turns a routed question into a model answer
pub struct Dispatcher<C: ModelClient> {
    client: Arc<C>,
    contexts: ContextBuilder,
    visualizer: Visualizer,
    retry: RetryPolicy,
}

impl<C: ModelClient> Dispatcher<C> {
    pub fn new(client: Arc<C>, limits: ContextLimits, retry: RetryPolicy) -> Self {
        Self {
            client,
            contexts: ContextBuilder::new(limits),
            visualizer: Visualizer::new(),
            retry,
        }
    }

    pub async fn dispatch(&self, request: AnalysisRequest<'_>) -> DispatchOutcome {
        let tag = format!("[Session-{}]", request.session_id);
        let mut transitions = vec![RequestState::Building];

        let grounding = match request.dataset {
            Some(dataset) => self.ground(dataset, request.route),
            None => Grounding::default(),
        };
        let context = self.contexts.build(
            request.dataset,
            request.history,
            request.route,
            request.question,
            grounding.text,
            grounding.notes,
        );
        let messages = context.to_messages();
        info!(
            "{} 🧭 Dispatching {} request ({} history turns, {} dropped, {} chars)",
            tag,
            context.intent,
            context.history.len(),
            context.dropped_turns,
            context.rendered_len()
        );

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;
        let reply = loop {
            attempts += 1;
            transitions.push(RequestState::Dispatched { attempt: attempts });

            match self.client.complete(request.api_key, &messages).await {
                Ok(text) => {
                    info!("{} ✅ Model answered on attempt {}", tag, attempts);
                    transitions.push(RequestState::Succeeded);
                    break Ok(text);
                }
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let delay = self.retry.delay_for(attempts);
                    warn!(
                        "{} 🔁 Attempt {}/{} failed: {}. Retrying in {}ms",
                        tag,
                        attempts,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    transitions.push(RequestState::Retrying {
                        attempt: attempts,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("{} ❌ Request failed after {} attempt(s): {}", tag, attempts, e);
                    transitions.push(RequestState::Failed);
                    break Err(e);
                }
            }
        };

        let state = transitions.last().cloned().unwrap_or(RequestState::Failed);
        DispatchOutcome {
            state,
            transitions,
            attempts,
            reply,
            chart: grounding.chart,
        }
    }

    fn ground(&self, dataset: &Dataset, route: &Route) -> Grounding {
        let mut grounding = Grounding::default();
        let result = match route.intent {
            AnalysisIntent::Forecast => forecast(dataset, route).map(|trend| Some(trend.to_string())),
            AnalysisIntent::Anomaly => outlier_report(dataset, &route.columns).map(Some),
            AnalysisIntent::Correlate => correlation_report(dataset, &route.columns).map(Some),
            AnalysisIntent::Visualize => {
                let spec = ChartSpec {
                    kind: route.chart_kind.unwrap_or(ChartKind::Histogram),
                    columns: route.columns.clone(),
                    bins: None,
                };
                match self.visualizer.render(dataset, &spec) {
                    Ok(chart) => {
                        let text = format!(
                            "A {} chart titled '{}' was drawn and is shown to the user.\n{}",
                            chart.reference.kind, chart.reference.title, chart.summary
                        );
                        grounding.chart = Some(chart);
                        Ok(Some(text))
                    }
                    Err(e) => {
                        grounding
                            .notes
                            .push(format!("The {} chart could not be drawn: {}", spec.kind, e));
                        Ok(None)
                    }
                }
            }
            AnalysisIntent::Describe | AnalysisIntent::Freeform => Ok(None),
        };

        match result {
            Ok(text) => grounding.text = text,
            Err(e) => grounding
                .notes
                .push(format!("No {} values could be computed: {}", route.intent, e)),
        }
        grounding
    }
}

/// Linear trend of the target column, ordered by the date column when the route names one.
fn forecast(dataset: &Dataset, route: &Route) -> Result<TrendEstimate> {
    let target = route
        .columns
        .first()
        .ok_or_else(|| anyhow!("no target column was selected"))?;
    let horizon = route.horizon.unwrap_or(1);
    let values = dataset.numeric_values(target)?;

    let (series, ordered_by) = match route.columns.get(1) {
        Some(date_column) => {
            let dates = dataset.datetime_values(date_column)?;
            let mut rows: Vec<_> = dates
                .into_iter()
                .zip(values)
                .filter_map(|(d, v)| d.zip(v))
                .collect();
            rows.sort_by_key(|(d, _)| *d);
            (rows.into_iter().map(|(_, v)| v).collect::<Vec<f64>>(), Some(date_column.clone()))
        }
        None => (values.into_iter().flatten().collect(), None),
    };

    let mut trend = linear_trend(target, &series, horizon)?;
    trend.ordered_by = ordered_by;
    Ok(trend)
}

fn outlier_report(dataset: &Dataset, columns: &[String]) -> Result<String> {
    let mut out = String::new();
    for column in columns {
        let values = dataset.numeric_values(column)?;
        if let Some(iqr) = detect_outliers(column, &values, OutlierMethod::Iqr) {
            let _ = writeln!(out, "- IQR (1.5×) {}", iqr);
        }
        if let Some(z) = detect_outliers(column, &values, OutlierMethod::Zscore) {
            let _ = writeln!(out, "- z-score {}", z);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("the selected columns have no numeric values"));
    }
    Ok(out.trim_end().to_string())
}

fn correlation_report(dataset: &Dataset, columns: &[String]) -> Result<String> {
    let mut out = String::new();
    for (i, left) in columns.iter().enumerate() {
        let left_values = dataset.numeric_values(left)?;
        for right in &columns[i + 1..] {
            let right_values = dataset.numeric_values(right)?;
            match calculate_correlation(&left_values, &right_values) {
                Ok((r, n)) => {
                    let _ = writeln!(out, "- Pearson r({}, {}) = {:.4} over {} rows", left, right, r, n);
                }
                Err(e) => {
                    let _ = writeln!(out, "- {} and {}: {}", left, right, e);
                }
            }
        }
    }
    if out.is_empty() {
        return Err(anyhow!("at least two numeric columns are needed"));
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForecastConfig;
    use crate::models::prompt::ModelMessage;
    use crate::services::processor::DatasetProcessor;
    use crate::services::router::CapabilityRouter;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Plays back canned replies and records every prompt it receives
    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, AnalysisError>>>,
        prompts: Mutex<Vec<Vec<ModelMessage>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, AnalysisError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn last_user_message(&self) -> String {
            let prompts = self.prompts.lock().unwrap();
            prompts.last().and_then(|m| m.last()).map(|m| m.content.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(&self, _api_key: &str, messages: &[ModelMessage]) -> Result<String, AnalysisError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("done".to_string()))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn dispatcher(client: Arc<ScriptedClient>) -> Dispatcher<ScriptedClient> {
        Dispatcher::new(client, ContextLimits::default(), fast_retry())
    }

    fn monthly_sales() -> Dataset {
        let mut csv = String::from("date,sales\n");
        for month in 1..=12 {
            csv.push_str(&format!("2023-{:02}-01,{}\n", month, 100 + 10 * (month - 1)));
        }
        DatasetProcessor::new().load("sales.csv", csv.as_bytes(), None).unwrap()
    }

    fn request<'a>(dataset: Option<&'a Dataset>, route: &'a Route, question: &'a str) -> AnalysisRequest<'a> {
        AnalysisRequest {
            session_id: Uuid::new_v4(),
            api_key: "sk-test",
            dataset,
            history: &[],
            route,
            question,
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_up_to_the_attempt_bound() {
        let client = ScriptedClient::new(vec![
            Err(AnalysisError::RateLimit("429".into())),
            Err(AnalysisError::RateLimit("429".into())),
            Err(AnalysisError::RateLimit("429".into())),
            Ok("never reached".into()),
        ]);
        let route = Route::freeform();
        let outcome = dispatcher(client.clone()).dispatch(request(None, &route, "hi")).await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(client.calls(), 3);
        assert_eq!(outcome.state, RequestState::Failed);
        assert!(outcome.state.is_terminal());
        assert!(matches!(outcome.reply, Err(AnalysisError::RateLimit(_))));
        assert_eq!(
            outcome.transitions,
            vec![
                RequestState::Building,
                RequestState::Dispatched { attempt: 1 },
                RequestState::Retrying { attempt: 1, delay_ms: 1 },
                RequestState::Dispatched { attempt: 2 },
                RequestState::Retrying { attempt: 2, delay_ms: 2 },
                RequestState::Dispatched { attempt: 3 },
                RequestState::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let client = ScriptedClient::new(vec![Err(AnalysisError::Auth("401".into()))]);
        let route = Route::freeform();
        let outcome = dispatcher(client.clone()).dispatch(request(None, &route, "hi")).await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(client.calls(), 1);
        assert!(matches!(outcome.reply, Err(AnalysisError::Auth(_))));
        assert_eq!(outcome.state, RequestState::Failed);
    }

    #[tokio::test]
    async fn test_network_failure_then_success() {
        let client = ScriptedClient::new(vec![
            Err(AnalysisError::Network("timeout".into())),
            Ok("recovered".into()),
        ]);
        let route = Route::freeform();
        let outcome = dispatcher(client).dispatch(request(None, &route, "hi")).await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.state, RequestState::Succeeded);
        assert_eq!(outcome.reply.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn test_forecast_prompt_carries_trend_values() {
        let dataset = monthly_sales();
        let question = "predict next 3 months of sales";
        let route = CapabilityRouter::new(ForecastConfig::default()).route(question, Some(dataset.metadata()));
        assert_eq!(route.intent, AnalysisIntent::Forecast);
        assert_eq!(route.columns, vec!["sales".to_string(), "date".to_string()]);
        assert_eq!(route.horizon, Some(3));

        let client = ScriptedClient::new(vec![Ok("Sales should keep rising by about 10 a month.".into())]);
        let outcome = dispatcher(client.clone())
            .dispatch(request(Some(&dataset), &route, question))
            .await;

        assert_eq!(outcome.state, RequestState::Succeeded);
        let prompt = client.last_user_message();
        assert!(prompt.contains("Analysis type: forecast"), "{}", prompt);
        assert!(prompt.contains("Linear trend for 'sales' over 12 observations ordered by 'date'"), "{}", prompt);
        assert!(prompt.contains("step +1: 220.00, step +2: 230.00, step +3: 240.00"), "{}", prompt);
        assert!(prompt.ends_with(question));
    }

    #[tokio::test]
    async fn test_visualize_attaches_chart_and_describes_it() {
        let dataset = monthly_sales();
        let route = Route {
            chart_kind: Some(ChartKind::Line),
            ..Route::with_columns(AnalysisIntent::Visualize, vec!["date".into(), "sales".into()])
        };
        let client = ScriptedClient::new(vec![]);
        let outcome = dispatcher(client.clone())
            .dispatch(request(Some(&dataset), &route, "plot sales over time"))
            .await;

        let chart = outcome.chart.expect("chart should be attached");
        assert_eq!(chart.reference.kind, ChartKind::Line);
        assert!(client.last_user_message().contains("A line chart titled 'sales over date'"));
    }

    #[tokio::test]
    async fn test_failed_render_becomes_a_note() {
        let dataset = monthly_sales();
        let route = Route {
            chart_kind: Some(ChartKind::Scatter),
            ..Route::with_columns(AnalysisIntent::Visualize, vec!["sales".into()])
        };
        let client = ScriptedClient::new(vec![]);
        let outcome = dispatcher(client.clone())
            .dispatch(request(Some(&dataset), &route, "scatter it"))
            .await;

        assert!(outcome.chart.is_none());
        assert_eq!(outcome.state, RequestState::Succeeded);
        assert!(client.last_user_message().contains("Note: The scatter chart could not be drawn"));
    }

    #[tokio::test]
    async fn test_anomaly_grounding_lists_both_methods() {
        let mut csv = String::from("value\n");
        for v in [10, 11, 12, 10, 11, 12, 10, 11, 12, 95] {
            csv.push_str(&format!("{}\n", v));
        }
        let dataset = DatasetProcessor::new().load("v.csv", csv.as_bytes(), None).unwrap();
        let route = Route::with_columns(AnalysisIntent::Anomaly, vec!["value".into()]);
        let client = ScriptedClient::new(vec![]);
        dispatcher(client.clone())
            .dispatch(request(Some(&dataset), &route, "any outliers?"))
            .await;

        let prompt = client.last_user_message();
        assert!(prompt.contains("- IQR (1.5×) 'value': 1 outliers"), "{}", prompt);
        assert!(prompt.contains("- z-score 'value'"), "{}", prompt);
    }
}
