use std::sync::Arc;

use log::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::models::chat::ChatTurn;
use crate::services::ai::ModelClient;
use crate::services::dispatcher::{AnalysisRequest, Dispatcher};
use crate::services::router::CapabilityRouter;
use crate::services::session::{SessionError, SessionStore};

/// Assistant reply for one user message
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub turn: ChatTurn,
    pub attempts: u32,
}

/// Runs the chat loop: route the message, dispatch it, record both turns
pub struct ConversationService<C: ModelClient> {
    sessions: SessionStore,
    router: CapabilityRouter,
    dispatcher: Dispatcher<C>,
}

impl<C: ModelClient> ConversationService<C> {
    pub fn new(sessions: SessionStore, client: Arc<C>, config: &Config) -> Self {
        Self {
            sessions,
            router: CapabilityRouter::new(config.forecast.clone()),
            dispatcher: Dispatcher::new(client, config.context.clone(), config.retry.clone()),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Answer `message` in the given session. Analysis failures come back as
    /// an error turn; only session problems are returned as `Err`.
    pub async fn ask(&self, session_id: Uuid, message: &str) -> Result<AskOutcome, SessionError> {
        let _guard = self.sessions.begin(session_id)?;
        info!("[Session-{}] 💬 Received message: {}", session_id, message);

        let (history, dataset, api_key) = self.sessions.with_session(session_id, |s| {
            let history = s.turns.clone();
            s.turns.push(ChatTurn::user(message));
            (history, s.dataset.clone(), s.api_key.clone().unwrap_or_default())
        })?;

        let route = self
            .router
            .route(message, dataset.as_deref().map(|d| d.metadata()));
        info!(
            "[Session-{}] 🧭 Routed to {} (columns: {:?})",
            session_id, route.intent, route.columns
        );

        let outcome = self
            .dispatcher
            .dispatch(AnalysisRequest {
                session_id,
                api_key: &api_key,
                dataset: dataset.as_deref(),
                history: &history,
                route: &route,
                question: message,
            })
            .await;

        let turn = match outcome.reply {
            Ok(text) => {
                let text = match &route.note {
                    Some(note) => format!("{}\n\n{}", note, text),
                    None => text,
                };
                let reference = match outcome.chart {
                    Some(chart) => {
                        let reference = chart.reference.clone();
                        self.sessions.store_chart(session_id, chart)?;
                        Some(reference)
                    }
                    None => None,
                };
                ChatTurn::assistant(text, route.intent, reference)
            }
            Err(e) => {
                error!("[Session-{}] ❌ Analysis failed ({}): {}", session_id, e.kind(), e);
                ChatTurn::assistant_error(e.user_message(), route.intent)
            }
        };

        self.sessions.append_turn(session_id, turn.clone())?;
        info!(
            "[Session-{}] ✅ Answer recorded after {} attempt(s), final state {}",
            session_id, outcome.attempts, outcome.state
        );

        Ok(AskOutcome {
            turn,
            attempts: outcome.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::models::chat::Role;
    use crate::models::intent::AnalysisIntent;
    use crate::models::prompt::ModelMessage;
    use crate::services::processor::DatasetProcessor;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, AnalysisError>>>,
        delay: Duration,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, AnalysisError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(&self, _api_key: &str, _messages: &[ModelMessage]) -> Result<String, AnalysisError> {
            tokio::time::sleep(self.delay).await;
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.retry.base_delay = Duration::from_millis(1);
        config.retry.max_delay = Duration::from_millis(2);
        config
    }

    fn service(client: Arc<ScriptedClient>) -> ConversationService<ScriptedClient> {
        ConversationService::new(SessionStore::new(), client, &config())
    }

    #[tokio::test]
    async fn test_ask_appends_user_and_assistant_turns() {
        let service = service(ScriptedClient::new(vec![Ok("Hello!".into())]));
        let id = service.sessions().create(Some("sk-test".into()));

        let outcome = service.ask(id, "hi there").await.unwrap();
        assert_eq!(outcome.turn.text, "Hello!");
        assert!(!outcome.turn.is_error);

        let turns = service.sessions().turns(id).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].text, "hi there");
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_failure_becomes_error_turn() {
        let service = service(ScriptedClient::new(vec![Err(AnalysisError::Auth("401".into()))]));
        let id = service.sessions().create(Some("sk-bad".into()));

        let outcome = service.ask(id, "hi").await.unwrap();
        assert!(outcome.turn.is_error);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.turn.text.contains("API key"));
        assert_eq!(service.sessions().turns(id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_downgrade_note_prefixes_answer() {
        let service = service(ScriptedClient::new(vec![Ok("Generally, trends...".into())]));
        let id = service.sessions().create(Some("sk-test".into()));

        let outcome = service.ask(id, "forecast next quarter").await.unwrap();
        assert_eq!(outcome.turn.intent, Some(AnalysisIntent::Freeform));
        assert!(outcome.turn.text.starts_with("No dataset is loaded yet"));
        assert!(outcome.turn.text.ends_with("Generally, trends..."));
    }

    #[tokio::test]
    async fn test_chart_is_stored_with_the_turn() {
        let service = service(ScriptedClient::new(vec![]));
        let id = service.sessions().create(Some("sk-test".into()));
        let dataset = DatasetProcessor::new()
            .load("d.csv", b"category,amount\na,1\nb,2\na,3\n", None)
            .unwrap();
        service.sessions().replace_dataset(id, dataset).unwrap();

        let outcome = service.ask(id, "draw a pie chart of amount by category").await.unwrap();
        let reference = outcome.turn.chart.expect("chart reference");
        assert!(service.sessions().chart(id, reference.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_ask_is_rejected() {
        let client = Arc::new(ScriptedClient {
            replies: Mutex::new(VecDeque::new()),
            delay: Duration::from_millis(200),
        });
        let service = Arc::new(service(client));
        let id = service.sessions().create(Some("sk-test".into()));

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.ask(id, "first").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = service.ask(id, "second").await;
        assert_eq!(second.unwrap_err(), SessionError::Busy(id));
        assert!(first.await.unwrap().is_ok());

        // Only the first exchange was recorded
        assert_eq!(service.sessions().turns(id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_cannot_be_cleared_mid_request() {
        let client = Arc::new(ScriptedClient {
            replies: Mutex::new(VecDeque::from(vec![Ok("answer".to_string())])),
            delay: Duration::from_millis(200),
        });
        let service = Arc::new(service(client));
        let id = service.sessions().create(Some("sk-test".into()));

        let running = {
            let service = service.clone();
            tokio::spawn(async move { service.ask(id, "hello").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(service.sessions().clear_turns(id).unwrap_err(), SessionError::Busy(id));
        assert!(running.await.unwrap().is_ok());

        let turns = service.sessions().turns(id).unwrap();
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(turns[1].text, "answer");
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let service = service(ScriptedClient::new(vec![]));
        let missing = Uuid::new_v4();
        assert_eq!(service.ask(missing, "hi").await.unwrap_err(), SessionError::NotFound(missing));
    }
}
