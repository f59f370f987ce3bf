//! Stateless request handling over a session store.
//!
//! Each call loads the session, runs one controller transition, and writes the
//! result back with a version check. Calls for the same session are
//! serialized in-process; calls for different sessions run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::instrument;

use crate::controller::{AssessmentController, OutputEvent};
use crate::error::EngineError;
use crate::model::Lesson;
use crate::report::{SessionReport, SessionSummary};
use crate::session::{SessionId, SessionState};
use crate::store::SessionStore;

/// One async lock per live session id.
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, id: SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only referenced by the map are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The engine's public entry points.
pub struct AssessmentService {
    controller: AssessmentController,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
}

impl AssessmentService {
    pub fn new(controller: AssessmentController, store: Arc<dyn SessionStore>) -> Self {
        Self {
            controller,
            store,
            locks: SessionLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Start a session and ask its first question.
    ///
    /// The session is stored only once the first question exists.
    #[instrument(skip_all, fields(lesson = %lesson.id))]
    pub async fn start_assessment(
        &self,
        lesson: &Lesson,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        let (state, event) = self.controller.start_assessment(lesson).await?;
        self.store.put(&state).await?;
        Ok((state, event))
    }

    /// Submit the learner's answer to the pending question.
    pub async fn submit_answer(
        &self,
        id: &SessionId,
        answer: &str,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        self.advance(id, Some(answer)).await
    }

    /// Move past feedback to the next outcome.
    pub async fn continue_session(
        &self,
        id: &SessionId,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        self.advance(id, None).await
    }

    #[instrument(skip(self, answer), fields(answered = answer.is_some()))]
    async fn advance(
        &self,
        id: &SessionId,
        answer: Option<&str>,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        let _guard = self.locks.acquire(*id).await;
        let state = self.load(id).await?;
        let (next, event) = self.controller.advance(&state, answer).await?;
        if next == state {
            return Ok((state, event));
        }
        let stored = self.store.compare_and_swap(state.version, &next).await?;
        tracing::debug!(version = stored.version, phase = %stored.phase, "session saved");
        Ok((stored, event))
    }

    /// Load and integrity-check a stored session.
    pub async fn load(&self, id: &SessionId) -> Result<SessionState, EngineError> {
        load_session(self.store.as_ref(), id).await
    }

    pub async fn progress(&self, id: &SessionId) -> Result<SessionSummary, EngineError> {
        Ok(SessionSummary::from_state(&self.load(id).await?))
    }

    pub async fn transcript(&self, id: &SessionId) -> Result<SessionReport, EngineError> {
        Ok(SessionReport::from_state(&self.load(id).await?))
    }
}

/// Read a session from `store` and check its integrity.
///
/// Needs no generator, so read-only tools can inspect sessions offline.
pub async fn load_session(
    store: &dyn SessionStore,
    id: &SessionId,
) -> Result<SessionState, EngineError> {
    let state = store
        .get(id)
        .await?
        .ok_or_else(|| EngineError::InvalidSession(format!("session {id} not found")))?;
    state
        .validate()
        .map_err(|reason| EngineError::InvalidSession(format!("session {id}: {reason}")))?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::controller::EngineConfig;
    use crate::error::{ErrorCode, GenerationError};
    use crate::mock::ScriptedGenerator;
    use crate::model::{LearningOutcome, MasteryConfig};
    use crate::session::Phase;
    use crate::store::{FileSessionStore, InMemorySessionStore};
    use crate::traits::RawEvaluation;

    fn lesson() -> Lesson {
        Lesson {
            id: "oop".into(),
            title: "OOP".into(),
            topic: "Python OOP".into(),
            description: String::new(),
            mastery: MasteryConfig::default(),
            outcomes: vec![
                LearningOutcome::new("classes", "Define classes")
                    .with_concepts(["class keyword", "self"]),
                LearningOutcome::new("inheritance", "Use inheritance")
                    .with_concepts(["super()"]),
            ],
        }
    }

    fn service(
        generator: &Arc<ScriptedGenerator>,
        store: Arc<dyn SessionStore>,
    ) -> AssessmentService {
        let config = EngineConfig {
            retry_delay: Duration::ZERO,
            max_retry_delay: Duration::ZERO,
            ..EngineConfig::default()
        };
        AssessmentService::new(AssessmentController::new(generator.clone(), config), store)
    }

    #[tokio::test]
    async fn session_resumes_from_store_alone() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ScriptedGenerator::new().with_scores(&[0.9, 0.9]));

        let id = {
            let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
            let service = service(&generator, store);
            let (state, _) = service.start_assessment(&lesson()).await.unwrap();
            service.submit_answer(&state.id, "first answer").await.unwrap();
            state.id
        };

        // a new process with nothing but the store
        let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
        let service = service(&generator, store);
        let summary = service.progress(&id).await.unwrap();
        assert_eq!(summary.mastered_count, 1);
        assert_eq!(summary.phase, "feedback");

        let (state, event) = service.continue_session(&id).await.unwrap();
        assert_eq!(state.current.id(), Some("inheritance"));
        assert!(event.question().is_some());
        let (state, _) = service.submit_answer(&id, "second answer").await.unwrap();
        let (state, event) = service.continue_session(&state.id).await.unwrap();
        assert!(state.is_completed());
        assert!(matches!(event, OutputEvent::Completed { .. }));
        assert_eq!(service.transcript(&id).await.unwrap().turns.len(), 2);
    }

    #[tokio::test]
    async fn versions_advance_once_per_turn() {
        let generator = Arc::new(ScriptedGenerator::new().with_scores(&[0.5]));
        let service = service(&generator, Arc::new(InMemorySessionStore::new()));

        let (state, _) = service.start_assessment(&lesson()).await.unwrap();
        assert_eq!(state.version, 0);
        let (state, _) = service.submit_answer(&state.id, "partial").await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.phase, Phase::Rephrase);
    }

    #[tokio::test]
    async fn failed_turn_commits_nothing() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_evaluation(Err(GenerationError::NetworkError("down".into())))
                .with_evaluation(Err(GenerationError::NetworkError("down".into())))
                .with_evaluation(Err(GenerationError::NetworkError("down".into())))
                .with_evaluation(Ok(RawEvaluation::scored(0.9, &[]))),
        );
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let service = service(&generator, store.clone());
        let (state, _) = service.start_assessment(&lesson()).await.unwrap();

        let err = service.submit_answer(&state.id, "answer").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::GenerationFailed);
        assert_eq!(store.get(&state.id).await.unwrap().unwrap(), state);

        // the same request succeeds once the service recovers
        let (state, _) = service.submit_answer(&state.id, "answer").await.unwrap();
        assert_eq!(state.phase, Phase::Feedback);
    }

    #[tokio::test]
    async fn failed_start_stores_nothing() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_question(Err(GenerationError::ModelNotFound("gone".into()))),
        );
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let service = service(&generator, store.clone());

        assert!(service.start_assessment(&lesson()).await.is_err());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_and_corrupt_sessions_are_invalid() {
        let generator = Arc::new(ScriptedGenerator::new());
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let service = service(&generator, store.clone());

        let err = service.progress(&SessionId::new()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSession);

        let mut broken = SessionState::new(&lesson()).unwrap();
        broken.phase = Phase::AnswerPending;
        store.put(&broken).await.unwrap();
        let err = service.submit_answer(&broken.id, "hello").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSession);
        assert_eq!(generator.total_calls(), 0);
    }

    #[tokio::test]
    async fn completed_session_is_not_rewritten() {
        let generator = Arc::new(ScriptedGenerator::new().with_scores(&[1.0, 1.0]));
        let service = service(&generator, Arc::new(InMemorySessionStore::new()));
        let (state, _) = service.start_assessment(&lesson()).await.unwrap();
        let id = state.id;
        service.submit_answer(&id, "a").await.unwrap();
        service.continue_session(&id).await.unwrap();
        service.submit_answer(&id, "b").await.unwrap();
        let (done, _) = service.continue_session(&id).await.unwrap();
        assert!(done.is_completed());

        let (again, event) = service.continue_session(&id).await.unwrap();
        assert_eq!(again.version, done.version);
        assert!(matches!(event, OutputEvent::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn same_session_calls_are_serialized() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_scores(&[0.5, 0.5])
                .with_delay(Duration::from_millis(50)),
        );
        let service = service(&generator, Arc::new(InMemorySessionStore::new()));
        let (state, _) = service.start_assessment(&lesson()).await.unwrap();
        let id = state.id;

        let results = futures::future::join_all([
            service.submit_answer(&id, "one"),
            service.submit_answer(&id, "two"),
        ])
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(generator.peak_in_flight(), 1);
        let stored = service.load(&id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.failed_attempts, 2);

        // idle locks are pruned on the next acquire
        drop(service.locks.acquire(SessionId::new()).await);
        assert_eq!(service.locks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_sessions_run_concurrently() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_scores(&[0.9, 0.9])
                .with_delay(Duration::from_millis(50)),
        );
        let service = service(&generator, Arc::new(InMemorySessionStore::new()));
        let (a, _) = service.start_assessment(&lesson()).await.unwrap();
        let (b, _) = service.start_assessment(&lesson()).await.unwrap();

        let results = futures::future::join_all([
            service.submit_answer(&a.id, "answer"),
            service.submit_answer(&b.id, "answer"),
        ])
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(generator.peak_in_flight(), 2);
    }
}
