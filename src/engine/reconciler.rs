//! Per-identity reconciliation as an explicit state machine.
//!
//! ```text
//! Start -> Lookup -> { CreatePath | RotatePath } -> AwaitConvergence
//!       -> ReadBack -> Propagate -> Done
//! ```
//!
//! Any state may move to `Failed(stage)`. Cancellation is honoured only up to
//! the point where the secret store is mutated; after a create or rotate has
//! been issued the identity runs to a terminal state so the two systems are
//! not left disagreeing.

use super::cancel::CancelSignal;
use super::report::{FailureStage, RotationOutcome, RotationStatus};
use super::waiter::{wait_until, Poll, PollPolicy, WaitError};
use crate::clients::{Identity, IdentityProvider, Password, SecretStore};
use crate::error::RotationError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which branch the reconciliation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPath {
    Create,
    Rotate,
}

impl RotationPath {
    fn status(self) -> RotationStatus {
        match self {
            RotationPath::Create => RotationStatus::Created,
            RotationPath::Rotate => RotationStatus::Rotated,
        }
    }
}

/// Condition the secret store must reach after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// Record discoverable and its password field present. `item_id` is set
    /// when the create response carried one.
    Created { item_id: Option<String> },
    /// Password differs from `previous`, or is present if nothing was read.
    Rotated {
        item_id: String,
        previous: Option<Password>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Start,
    Lookup,
    CreatePath,
    RotatePath {
        item_id: String,
        previous: Option<Password>,
    },
    AwaitConvergence(Convergence),
    ReadBack {
        path: RotationPath,
        item_id: String,
    },
    Propagate {
        path: RotationPath,
        password: Password,
    },
    Done(RotationPath),
    Failed {
        stage: FailureStage,
        error: RotationError,
    },
    Cancelled,
}

impl ReconcileState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconcileState::Done(_) | ReconcileState::Failed { .. } | ReconcileState::Cancelled
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReconcileState::Start => "start",
            ReconcileState::Lookup => "lookup",
            ReconcileState::CreatePath => "create",
            ReconcileState::RotatePath { .. } => "rotate",
            ReconcileState::AwaitConvergence(_) => "await-convergence",
            ReconcileState::ReadBack { .. } => "readback",
            ReconcileState::Propagate { .. } => "propagate",
            ReconcileState::Done(_) => "done",
            ReconcileState::Failed { .. } => "failed",
            ReconcileState::Cancelled => "cancelled",
        }
    }

    fn failed(stage: FailureStage, error: RotationError) -> Self {
        ReconcileState::Failed { stage, error }
    }
}

/// Drives one identity from `Start` to a terminal state.
pub struct Reconciler {
    store: Arc<dyn SecretStore>,
    idp: Arc<dyn IdentityProvider>,
    poll: PollPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn SecretStore>, idp: Arc<dyn IdentityProvider>, poll: PollPolicy) -> Self {
        Self { store, idp, poll }
    }

    /// Reconcile `identity` and produce its outcome.
    pub async fn reconcile(&self, identity: &Identity, cancel: &CancelSignal) -> RotationOutcome {
        let mut state = ReconcileState::Start;
        while !state.is_terminal() {
            let from = state.name();
            state = self.step(identity, state, cancel).await;
            debug!("{}: {} -> {}", identity.id, from, state.name());
        }
        self.finish(identity, state)
    }

    fn finish(&self, identity: &Identity, state: ReconcileState) -> RotationOutcome {
        match state {
            ReconcileState::Done(path) => {
                info!("{}: password {}", identity.id, path.status());
                RotationOutcome::success(identity.clone(), path.status())
            }
            ReconcileState::Failed { stage, error } => {
                warn!("{}: failed at {}: {}", identity.id, stage, error);
                RotationOutcome::failed(identity.clone(), stage, &error)
            }
            ReconcileState::Cancelled => {
                info!("{}: cancelled before any change was made", identity.id);
                RotationOutcome::cancelled(identity.clone())
            }
            other => unreachable!("finish called on non-terminal state {}", other.name()),
        }
    }

    /// Perform one transition.
    pub async fn step(
        &self,
        identity: &Identity,
        state: ReconcileState,
        cancel: &CancelSignal,
    ) -> ReconcileState {
        match state {
            ReconcileState::Start => {
                if cancel.is_cancelled() {
                    ReconcileState::Cancelled
                } else {
                    ReconcileState::Lookup
                }
            }

            ReconcileState::Lookup => self.lookup(identity, cancel).await,

            ReconcileState::CreatePath => {
                if cancel.is_cancelled() {
                    return ReconcileState::Cancelled;
                }
                match self.store.create_record(&identity.id, &identity.email).await {
                    Ok(item_id) => ReconcileState::AwaitConvergence(Convergence::Created { item_id }),
                    Err(e) => ReconcileState::failed(FailureStage::Create, e),
                }
            }

            ReconcileState::RotatePath { item_id, previous } => {
                if cancel.is_cancelled() {
                    return ReconcileState::Cancelled;
                }
                match self.store.rotate_password(&item_id).await {
                    Ok(()) => ReconcileState::AwaitConvergence(Convergence::Rotated { item_id, previous }),
                    Err(e) => ReconcileState::failed(FailureStage::Rotate, e),
                }
            }

            ReconcileState::AwaitConvergence(target) => self.await_convergence(identity, target).await,

            ReconcileState::ReadBack { path, item_id } => match self.store.read_password(&item_id).await {
                Ok(password) => ReconcileState::Propagate { path, password },
                Err(e) => ReconcileState::failed(FailureStage::Readback, e),
            },

            ReconcileState::Propagate { path, password } => {
                match self.idp.set_password(&identity.id, &password).await {
                    Ok(()) => ReconcileState::Done(path),
                    Err(e) => ReconcileState::failed(FailureStage::Propagate, e),
                }
            }

            terminal => terminal,
        }
    }

    async fn lookup(&self, identity: &Identity, cancel: &CancelSignal) -> ReconcileState {
        let found = match cancel.run_until_cancelled(self.store.find_record(&identity.id)).await {
            None => return ReconcileState::Cancelled,
            Some(Ok(found)) => found,
            Some(Err(e)) => return ReconcileState::failed(FailureStage::Lookup, e),
        };

        let Some(record) = found else {
            return ReconcileState::CreatePath;
        };

        // Baseline for detecting that the rotation has landed.
        let previous = match cancel.run_until_cancelled(self.store.read_password(&record.item_id)).await {
            None => return ReconcileState::Cancelled,
            Some(Ok(password)) => Some(password),
            Some(Err(RotationError::FieldMissing(_))) => None,
            Some(Err(e)) => return ReconcileState::failed(FailureStage::Lookup, e),
        };

        ReconcileState::RotatePath {
            item_id: record.item_id,
            previous,
        }
    }

    async fn await_convergence(&self, identity: &Identity, target: Convergence) -> ReconcileState {
        let (path, result) = match target {
            Convergence::Created { item_id } => (
                RotationPath::Create,
                self.wait_for_created(&identity.id, item_id).await,
            ),
            Convergence::Rotated { item_id, previous } => (
                RotationPath::Rotate,
                self.wait_for_rotated(item_id, previous).await,
            ),
        };

        match result {
            Ok(item_id) => ReconcileState::ReadBack { path, item_id },
            Err(WaitError::TimedOut { attempts }) => ReconcileState::failed(
                FailureStage::ConvergenceTimeout,
                RotationError::ConvergenceTimeout { attempts },
            ),
            Err(WaitError::Predicate((stage, e))) => ReconcileState::failed(stage, e),
        }
    }

    /// Poll until the created record can be found by title and carries a
    /// password. Uses the id from the create response when there is one.
    async fn wait_for_created(
        &self,
        title: &str,
        known_id: Option<String>,
    ) -> Result<String, WaitError<(FailureStage, RotationError)>> {
        let store = &self.store;
        let known_id = known_id.as_deref();

        wait_until(&self.poll, move || async move {
            let item_id = match known_id {
                Some(id) => id.to_string(),
                None => match store.find_record(title).await {
                    Ok(Some(record)) => record.item_id,
                    Ok(None) => return Ok(Poll::NotYet),
                    Err(e) => return Err((FailureStage::Lookup, e)),
                },
            };
            match store.read_password(&item_id).await {
                Ok(_) => Ok(Poll::Ready(item_id)),
                Err(RotationError::FieldMissing(_)) | Err(RotationError::NotFound(_)) => Ok(Poll::NotYet),
                Err(e) => Err((FailureStage::Readback, e)),
            }
        })
        .await
    }

    /// Poll until the password differs from `previous` (or exists at all).
    async fn wait_for_rotated(
        &self,
        item_id: String,
        previous: Option<Password>,
    ) -> Result<String, WaitError<(FailureStage, RotationError)>> {
        let store = &self.store;
        let item_ref = item_id.as_str();
        let previous = previous.as_ref();

        wait_until(&self.poll, move || async move {
            match store.read_password(item_ref).await {
                Ok(current) if previous != Some(&current) => Ok(Poll::Ready(())),
                Ok(_) | Err(RotationError::FieldMissing(_)) => Ok(Poll::NotYet),
                Err(e) => Err((FailureStage::Readback, e)),
            }
        })
        .await?;

        Ok(item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::RecordRef;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Store whose every call is scripted by the test.
    #[derive(Default)]
    struct ScriptedStore {
        find: Mutex<Vec<Result<Option<RecordRef>>>>,
        reads: Mutex<Vec<Result<Password>>>,
        create: Mutex<Option<Result<Option<String>>>>,
        rotate: Mutex<Option<Result<()>>>,
        mutations: Mutex<u32>,
    }

    fn pop<T>(queue: &Mutex<Vec<T>>) -> T {
        let mut q = queue.lock().unwrap();
        assert!(!q.is_empty(), "unscripted call");
        q.remove(0)
    }

    #[async_trait]
    impl SecretStore for ScriptedStore {
        async fn verify_access(&self) -> Result<()> {
            Ok(())
        }
        async fn find_record(&self, _title: &str) -> Result<Option<RecordRef>> {
            pop(&self.find)
        }
        async fn create_record(&self, _title: &str, _username: &str) -> Result<Option<String>> {
            *self.mutations.lock().unwrap() += 1;
            self.create.lock().unwrap().take().expect("unscripted create")
        }
        async fn rotate_password(&self, _item_id: &str) -> Result<()> {
            *self.mutations.lock().unwrap() += 1;
            self.rotate.lock().unwrap().take().expect("unscripted rotate")
        }
        async fn read_password(&self, _item_id: &str) -> Result<Password> {
            pop(&self.reads)
        }
        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingIdp {
        set: Mutex<Vec<(String, Password)>>,
        fail_with: Option<RotationError>,
    }

    #[async_trait]
    impl IdentityProvider for RecordingIdp {
        async fn list_group_members(&self, _group_id: &str) -> Result<Vec<Identity>> {
            Ok(vec![])
        }
        async fn set_password(&self, identity_id: &str, password: &Password) -> Result<()> {
            if let Some(ref e) = self.fail_with {
                return Err(e.clone());
            }
            self.set
                .lock()
                .unwrap()
                .push((identity_id.to_string(), password.clone()));
            Ok(())
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    fn record(id: &str) -> RecordRef {
        RecordRef {
            item_id: id.to_string(),
            title: "u1".to_string(),
        }
    }

    fn pw(v: &str) -> Password {
        Password::new(v)
    }

    fn reconciler(store: Arc<ScriptedStore>, idp: Arc<RecordingIdp>) -> Reconciler {
        Reconciler::new(store, idp, PollPolicy::fixed(3, Duration::from_millis(1)))
    }

    fn identity() -> Identity {
        Identity::new("u1", "a@x.com")
    }

    #[tokio::test]
    async fn lookup_hit_reads_baseline_then_rotates() {
        let store = Arc::new(ScriptedStore::default());
        *store.find.lock().unwrap() = vec![Ok(Some(record("i1")))];
        *store.reads.lock().unwrap() = vec![Ok(pw("old"))];
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r.step(&identity(), ReconcileState::Lookup, &CancelSignal::new()).await;
        assert_eq!(
            next,
            ReconcileState::RotatePath {
                item_id: "i1".into(),
                previous: Some(pw("old")),
            }
        );
    }

    #[tokio::test]
    async fn lookup_miss_goes_to_create() {
        let store = Arc::new(ScriptedStore::default());
        *store.find.lock().unwrap() = vec![Ok(None)];
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r.step(&identity(), ReconcileState::Lookup, &CancelSignal::new()).await;
        assert_eq!(next, ReconcileState::CreatePath);
    }

    #[tokio::test]
    async fn missing_baseline_field_still_rotates() {
        let store = Arc::new(ScriptedStore::default());
        *store.find.lock().unwrap() = vec![Ok(Some(record("i1")))];
        *store.reads.lock().unwrap() = vec![Err(RotationError::FieldMissing("i1".into()))];
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r.step(&identity(), ReconcileState::Lookup, &CancelSignal::new()).await;
        assert_eq!(
            next,
            ReconcileState::RotatePath {
                item_id: "i1".into(),
                previous: None,
            }
        );
    }

    #[tokio::test]
    async fn unreadable_baseline_fails_at_lookup_without_rotating() {
        for error in [
            RotationError::NotFound("item i1".into()),
            RotationError::network("onepassword returned 503"),
        ] {
            let store = Arc::new(ScriptedStore::default());
            *store.find.lock().unwrap() = vec![Ok(Some(record("i1")))];
            *store.reads.lock().unwrap() = vec![Err(error.clone())];
            let r = reconciler(store.clone(), Arc::new(RecordingIdp::default()));

            let outcome = r.reconcile(&identity(), &CancelSignal::new()).await;
            assert_eq!(outcome.status, RotationStatus::Failed);
            assert_eq!(outcome.failure_stage, Some(FailureStage::Lookup));
            assert_eq!(outcome.error, Some(error.to_string()));
            assert_eq!(*store.mutations.lock().unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn lookup_error_fails_at_lookup() {
        let store = Arc::new(ScriptedStore::default());
        *store.find.lock().unwrap() = vec![Err(RotationError::network("reset"))];
        let r = reconciler(store.clone(), Arc::new(RecordingIdp::default()));

        let outcome = r.reconcile(&identity(), &CancelSignal::new()).await;
        assert_eq!(outcome.status, RotationStatus::Failed);
        assert_eq!(outcome.failure_stage, Some(FailureStage::Lookup));
        assert_eq!(*store.mutations.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn rotate_error_fails_at_rotate() {
        let store = Arc::new(ScriptedStore::default());
        *store.rotate.lock().unwrap() = Some(Err(RotationError::Client {
            status: 400,
            body: "bad".into(),
        }));
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r
            .step(
                &identity(),
                ReconcileState::RotatePath {
                    item_id: "i1".into(),
                    previous: None,
                },
                &CancelSignal::new(),
            )
            .await;
        assert!(matches!(
            next,
            ReconcileState::Failed {
                stage: FailureStage::Rotate,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn create_error_fails_at_create() {
        let store = Arc::new(ScriptedStore::default());
        *store.create.lock().unwrap() = Some(Err(RotationError::Client {
            status: 400,
            body: "title rejected".into(),
        }));
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r
            .step(&identity(), ReconcileState::CreatePath, &CancelSignal::new())
            .await;
        assert!(matches!(
            next,
            ReconcileState::Failed {
                stage: FailureStage::Create,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rotation_waits_for_value_to_change() {
        let store = Arc::new(ScriptedStore::default());
        *store.reads.lock().unwrap() = vec![Ok(pw("old")), Ok(pw("old")), Ok(pw("new"))];
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r
            .step(
                &identity(),
                ReconcileState::AwaitConvergence(Convergence::Rotated {
                    item_id: "i1".into(),
                    previous: Some(pw("old")),
                }),
                &CancelSignal::new(),
            )
            .await;
        assert_eq!(
            next,
            ReconcileState::ReadBack {
                path: RotationPath::Rotate,
                item_id: "i1".into(),
            }
        );
    }

    #[tokio::test]
    async fn unchanged_value_times_out() {
        let store = Arc::new(ScriptedStore::default());
        *store.reads.lock().unwrap() = vec![Ok(pw("old")), Ok(pw("old")), Ok(pw("old"))];
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r
            .step(
                &identity(),
                ReconcileState::AwaitConvergence(Convergence::Rotated {
                    item_id: "i1".into(),
                    previous: Some(pw("old")),
                }),
                &CancelSignal::new(),
            )
            .await;
        assert_eq!(
            next,
            ReconcileState::Failed {
                stage: FailureStage::ConvergenceTimeout,
                error: RotationError::ConvergenceTimeout { attempts: 3 },
            }
        );
    }

    #[tokio::test]
    async fn create_uses_returned_id_without_requery() {
        let store = Arc::new(ScriptedStore::default());
        *store.reads.lock().unwrap() = vec![Err(RotationError::FieldMissing("i9".into())), Ok(pw("gen"))];
        let r = reconciler(store.clone(), Arc::new(RecordingIdp::default()));

        let next = r
            .step(
                &identity(),
                ReconcileState::AwaitConvergence(Convergence::Created {
                    item_id: Some("i9".into()),
                }),
                &CancelSignal::new(),
            )
            .await;
        assert_eq!(
            next,
            ReconcileState::ReadBack {
                path: RotationPath::Create,
                item_id: "i9".into(),
            }
        );
        assert!(store.find.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn readback_missing_field_fails_at_readback() {
        let store = Arc::new(ScriptedStore::default());
        *store.reads.lock().unwrap() = vec![Err(RotationError::FieldMissing("i1".into()))];
        let r = reconciler(store, Arc::new(RecordingIdp::default()));

        let next = r
            .step(
                &identity(),
                ReconcileState::ReadBack {
                    path: RotationPath::Rotate,
                    item_id: "i1".into(),
                },
                &CancelSignal::new(),
            )
            .await;
        assert!(matches!(
            next,
            ReconcileState::Failed {
                stage: FailureStage::Readback,
                error: RotationError::FieldMissing(_),
            }
        ));
    }

    #[tokio::test]
    async fn propagate_error_fails_at_propagate() {
        let idp = Arc::new(RecordingIdp {
            fail_with: Some(RotationError::network("okta down")),
            ..RecordingIdp::default()
        });
        let r = reconciler(Arc::new(ScriptedStore::default()), idp);

        let next = r
            .step(
                &identity(),
                ReconcileState::Propagate {
                    path: RotationPath::Create,
                    password: pw("gen"),
                },
                &CancelSignal::new(),
            )
            .await;
        assert!(matches!(
            next,
            ReconcileState::Failed {
                stage: FailureStage::Propagate,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn full_rotate_propagates_last_read_value() {
        let store = Arc::new(ScriptedStore::default());
        *store.find.lock().unwrap() = vec![Ok(Some(record("i1")))];
        *store.rotate.lock().unwrap() = Some(Ok(()));
        // baseline, two convergence polls, readback
        *store.reads.lock().unwrap() = vec![Ok(pw("old")), Ok(pw("old")), Ok(pw("new")), Ok(pw("new"))];
        let idp = Arc::new(RecordingIdp::default());
        let r = reconciler(store, idp.clone());

        let outcome = r.reconcile(&identity(), &CancelSignal::new()).await;
        assert_eq!(outcome.status, RotationStatus::Rotated);
        assert_eq!(*idp.set.lock().unwrap(), vec![("u1".to_string(), pw("new"))]);
    }

    #[tokio::test]
    async fn cancelled_before_mutation_makes_no_change() {
        let store = Arc::new(ScriptedStore::default());
        let cancel = CancelSignal::new();
        cancel.cancel();
        let r = reconciler(store.clone(), Arc::new(RecordingIdp::default()));

        let outcome = r.reconcile(&identity(), &cancel).await;
        assert_eq!(outcome.status, RotationStatus::Cancelled);
        assert_eq!(*store.mutations.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn cancellation_after_rotate_still_propagates() {
        let store = Arc::new(ScriptedStore::default());
        *store.reads.lock().unwrap() = vec![Ok(pw("new")), Ok(pw("new"))];
        let idp = Arc::new(RecordingIdp::default());
        let r = reconciler(store, idp.clone());
        let cancel = CancelSignal::new();
        cancel.cancel();

        let mut state = ReconcileState::AwaitConvergence(Convergence::Rotated {
            item_id: "i1".into(),
            previous: Some(pw("old")),
        });
        while !state.is_terminal() {
            state = r.step(&identity(), state, &cancel).await;
        }

        assert_eq!(state, ReconcileState::Done(RotationPath::Rotate));
        assert_eq!(idp.set.lock().unwrap().len(), 1);
    }
}
