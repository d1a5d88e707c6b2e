use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::models::chat::ChatTurn;
use crate::services::charts::RenderedChart;
use crate::services::processor::Dataset;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(Uuid),

    /// Another analysis is already running for this session
    #[error("Session {0} is busy with another request")]
    Busy(Uuid),
}

/// State for one user conversation
#[derive(Debug)]
pub struct ChatSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub api_key: Option<String>,
    pub dataset: Option<Arc<Dataset>>,
    /// Append-only except for an explicit clear
    pub turns: Vec<ChatTurn>,
    pub charts: HashMap<Uuid, RenderedChart>,
    in_flight: bool,
}

impl ChatSession {
    fn new(id: Uuid, api_key: Option<String>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            api_key,
            dataset: None,
            turns: Vec::new(),
            charts: HashMap::new(),
            in_flight: false,
        }
    }
}

/// In-memory session registry. The lock is only held for short synchronous
/// sections, never across an await.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, ChatSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ChatSession>> {
        // A panic while holding the lock leaves the map itself intact
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, api_key: Option<String>) -> Uuid {
        let id = Uuid::new_v4();
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        info!("[Session-{}] 🆕 Created (api key: {})", id, api_key.is_some());
        self.lock().insert(id, ChatSession::new(id, api_key));
        id
    }

    /// Run `f` against the session under the lock
    pub fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ChatSession) -> T,
    ) -> Result<T, SessionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        Ok(f(session))
    }

    /// Like `with_session`, but refuses while an analysis holds the session.
    /// Used by operations that would change what the running request sees.
    fn with_idle_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ChatSession) -> T,
    ) -> Result<T, SessionError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if session.in_flight {
            warn!("[Session-{}] ⏳ Rejected change while a request is running", id);
            return Err(SessionError::Busy(id));
        }
        Ok(f(session))
    }

    pub fn exists(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn set_api_key(&self, id: Uuid, api_key: String) -> Result<(), SessionError> {
        self.with_session(id, |s| {
            s.api_key = Some(api_key).filter(|k| !k.trim().is_empty());
        })?;
        info!("[Session-{}] 🔑 API key replaced", id);
        Ok(())
    }

    pub fn api_key(&self, id: Uuid) -> Result<Option<String>, SessionError> {
        self.with_session(id, |s| s.api_key.clone())
    }

    /// Install a new dataset, dropping the old one and every chart drawn from it
    pub fn replace_dataset(&self, id: Uuid, dataset: Dataset) -> Result<Arc<Dataset>, SessionError> {
        let dataset = Arc::new(dataset);
        self.with_idle_session(id, |s| {
            s.dataset = Some(dataset.clone());
            s.charts.clear();
        })?;
        info!("[Session-{}] 📦 Dataset replaced with {}", id, dataset.metadata().file_name);
        Ok(dataset)
    }

    pub fn reset_dataset(&self, id: Uuid) -> Result<bool, SessionError> {
        let had_dataset = self.with_idle_session(id, |s| {
            s.charts.clear();
            s.dataset.take().is_some()
        })?;
        info!("[Session-{}] 🧹 Dataset reset", id);
        Ok(had_dataset)
    }

    pub fn dataset(&self, id: Uuid) -> Result<Option<Arc<Dataset>>, SessionError> {
        self.with_session(id, |s| s.dataset.clone())
    }

    pub fn append_turn(&self, id: Uuid, turn: ChatTurn) -> Result<(), SessionError> {
        self.with_session(id, |s| s.turns.push(turn))
    }

    pub fn turns(&self, id: Uuid) -> Result<Vec<ChatTurn>, SessionError> {
        self.with_session(id, |s| s.turns.clone())
    }

    pub fn clear_turns(&self, id: Uuid) -> Result<usize, SessionError> {
        let cleared = self.with_idle_session(id, |s| std::mem::take(&mut s.turns).len())?;
        info!("[Session-{}] 🧹 Cleared {} chat turns", id, cleared);
        Ok(cleared)
    }

    pub fn store_chart(&self, id: Uuid, chart: RenderedChart) -> Result<(), SessionError> {
        self.with_session(id, |s| {
            s.charts.insert(chart.reference.id, chart);
        })
    }

    pub fn chart(&self, id: Uuid, chart_id: Uuid) -> Result<Option<RenderedChart>, SessionError> {
        self.with_session(id, |s| s.charts.get(&chart_id).cloned())
    }

    /// Claim the session for one analysis. Fails with `Busy` while another
    /// guard for the same session is alive.
    pub fn begin(&self, id: Uuid) -> Result<InFlightGuard, SessionError> {
        let claimed = self.with_session(id, |s| !std::mem::replace(&mut s.in_flight, true))?;
        if !claimed {
            warn!("[Session-{}] ⏳ Rejected concurrent request", id);
            return Err(SessionError::Busy(id));
        }
        Ok(InFlightGuard {
            store: self.clone(),
            id,
        })
    }
}

/// Releases the session's in-flight flag when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    store: SessionStore,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(session) = self.store.lock().get_mut(&self.id) {
            session.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::intent::ChartKind;
    use crate::services::charts::{ChartSpec, Visualizer};
    use crate::services::processor::DatasetProcessor;

    fn dataset(csv: &str) -> Dataset {
        DatasetProcessor::new().load("data.csv", csv.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let store = SessionStore::new();
        let missing = Uuid::new_v4();
        assert_eq!(store.turns(missing).unwrap_err(), SessionError::NotFound(missing));
    }

    #[test]
    fn test_blank_api_key_is_not_stored() {
        let store = SessionStore::new();
        let id = store.create(Some("   ".to_string()));
        assert_eq!(store.api_key(id).unwrap(), None);

        store.set_api_key(id, "sk-new".to_string()).unwrap();
        assert_eq!(store.api_key(id).unwrap().as_deref(), Some("sk-new"));
    }

    #[test]
    fn test_second_guard_is_rejected_until_first_drops() {
        let store = SessionStore::new();
        let id = store.create(None);

        let guard = store.begin(id).unwrap();
        assert_eq!(store.begin(id).unwrap_err(), SessionError::Busy(id));
        drop(guard);
        assert!(store.begin(id).is_ok());
    }

    #[test]
    fn test_replacing_dataset_drops_old_charts() {
        let store = SessionStore::new();
        let id = store.create(None);
        let first = store.replace_dataset(id, dataset("a,b\n1,2\n3,4\n")).unwrap();

        let spec = ChartSpec {
            kind: ChartKind::Scatter,
            columns: vec!["a".to_string(), "b".to_string()],
            bins: None,
        };
        let chart = Visualizer::new().render(&first, &spec).unwrap();
        let chart_id = chart.reference.id;
        store.store_chart(id, chart).unwrap();
        assert!(store.chart(id, chart_id).unwrap().is_some());

        let replaced = store.replace_dataset(id, dataset("x\n5\n6\n")).unwrap();
        assert_eq!(replaced.metadata().columns[0].name, "x");
        assert!(store.chart(id, chart_id).unwrap().is_none());

        assert!(store.reset_dataset(id).unwrap());
        assert!(store.dataset(id).unwrap().is_none());
    }

    #[test]
    fn test_session_is_frozen_while_a_request_runs() {
        let store = SessionStore::new();
        let id = store.create(None);
        store.replace_dataset(id, dataset("a,b\n1,2\n3,4\n")).unwrap();
        store.append_turn(id, ChatTurn::user("one")).unwrap();

        let guard = store.begin(id).unwrap();
        assert_eq!(store.clear_turns(id).unwrap_err(), SessionError::Busy(id));
        assert_eq!(
            store.replace_dataset(id, dataset("x\n5\n6\n")).unwrap_err(),
            SessionError::Busy(id)
        );
        assert_eq!(store.reset_dataset(id).unwrap_err(), SessionError::Busy(id));

        // The running request itself can still record turns
        store.append_turn(id, ChatTurn::user("two")).unwrap();
        drop(guard);

        assert_eq!(store.turns(id).unwrap().len(), 2);
        assert_eq!(store.dataset(id).unwrap().unwrap().metadata().columns[0].name, "a");
        assert_eq!(store.clear_turns(id).unwrap(), 2);
        assert!(store.reset_dataset(id).unwrap());
    }

    #[test]
    fn test_clear_turns_empties_history() {
        let store = SessionStore::new();
        let id = store.create(None);
        store.append_turn(id, ChatTurn::user("one")).unwrap();
        store.append_turn(id, ChatTurn::user("two")).unwrap();
        assert_eq!(store.clear_turns(id).unwrap(), 2);
        assert!(store.turns(id).unwrap().is_empty());
    }
}
