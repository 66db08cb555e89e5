//! The Sample state machine.
//!
//! Every call starts from a fresh read; nothing about an object survives
//! between calls. Per invocation:
//!
//! 1. fetch (gone → done, no requeue);
//! 2. deleting but not yet in the final deletion state → write that state;
//! 3. live without the finalizer → add it and come back;
//! 4. otherwise dispatch on `status.state` to a handler, which refreshes the
//!    `DivisibleByThree` condition and picks the next scheduling action.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use super::events::{EventRecorder, EventType};
use super::finalizer::{self, FinalizerGuard, FinalizerOutcome, FinalizerRelease};
use super::status::StatusPatcher;
use crate::resource::{Condition, ConditionStatus, Sample, SampleStatus, State};
use crate::store::{self, Store};
use crate::types::{Error, FieldManager, ObjectKey, ReconcilerConfig, Result, StateOwnership};

/// What the queue should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NoRequeue,
    RequeueImmediately,
    RequeueAfter(Duration),
}

/// `True` iff `some_number` is an integer divisible by three. Anything
/// unparsable is simply `False`.
pub fn divisible_by_three(some_number: &str) -> ConditionStatus {
    some_number
        .parse::<i64>()
        .map(|n| n % 3 == 0)
        .unwrap_or(false)
        .into()
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    config: Arc<ReconcilerConfig>,
    conditions: StatusPatcher,
    lifecycle: StatusPatcher,
    finalizer: FinalizerGuard,
    release: Arc<dyn FinalizerRelease>,
    recorder: Arc<dyn EventRecorder>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        config: Arc<ReconcilerConfig>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Result<Self> {
        let owner = FieldManager::from_string(config.field_owner.as_str())?;
        let condition_owner = FieldManager::from_string(config.condition_owner.as_str())?;

        Ok(Self {
            conditions: StatusPatcher::conditions(
                store.clone(),
                condition_owner,
                config.store_timeout,
            ),
            lifecycle: StatusPatcher::lifecycle(store.clone(), owner.clone(), config.store_timeout),
            finalizer: FinalizerGuard::new(
                store.clone(),
                config.finalizer.as_str(),
                owner,
                config.store_timeout,
            ),
            release: finalizer::release_for(config.finalizer_release),
            store,
            config,
            recorder,
        })
    }

    /// Replace the finalizer release collaborator.
    pub fn with_release(mut self, release: Arc<dyn FinalizerRelease>) -> Self {
        self.release = release;
        self
    }

    /// Whether status writers take over conflicting fields.
    pub fn with_force(mut self, force: bool) -> Self {
        self.conditions = self.conditions.with_force(force);
        self.lifecycle = self.lifecycle.with_force(force);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one reconciliation of `key`. An object vanishing mid-cycle ends
    /// the cycle cleanly; every other failure is recorded as a Warning event
    /// and returned for backoff.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        match self.reconcile_once(key).await {
            Err(err) if err.is_not_found() => {
                tracing::info!(key = %key, "got deleted");
                Ok(Action::NoRequeue)
            }
            Err(err) => {
                self.recorder
                    .record(key, EventType::Warning, err.reason(), &err.to_string());
                Err(err)
            }
            ok => ok,
        }
    }

    async fn reconcile_once(&self, key: &ObjectKey) -> Result<Action> {
        let object =
            store::with_deadline(self.config.store_timeout, "get", self.store.get(key)).await?;

        tracing::info!(
            key = %key,
            state = %object.state(),
            generation = object.generation(),
            "reconciling Sample"
        );

        if object.is_deleting() && object.state() != self.config.final_deletion_state {
            return self.begin_deletion(&object).await;
        }

        if !object.is_deleting() && !self.finalizer.is_present(&object) {
            // Persist, then come back on a fresh read; no handler runs in
            // the cycle that adds the marker.
            if self.finalizer.ensure(&object).await? == FinalizerOutcome::Added {
                self.recorder.record(
                    key,
                    EventType::Normal,
                    "FinalizerAdded",
                    self.finalizer.finalizer(),
                );
            }
            return Ok(Action::RequeueImmediately);
        }

        self.pause_before_dispatch().await;

        let (action, latest) = self.dispatch(&object).await?;

        if latest.is_deleting() && self.release.release(&self.finalizer, &latest).await? {
            self.recorder.record(
                key,
                EventType::Normal,
                "FinalizerRemoved",
                "deletion acknowledged; finalizer released",
            );
            return Ok(Action::NoRequeue);
        }
        Ok(action)
    }

    /// Exhaustive dispatch on the observed state. Returns the action and the
    /// newest copy of the object.
    async fn dispatch(&self, object: &Sample) -> Result<(Action, Sample)> {
        match object.state() {
            State::Unset => self.handle_initial_state(object).await,
            State::Processing | State::Deleting | State::Error => {
                let latest = self.handle_any_other_state(object).await?;
                Ok((Action::RequeueImmediately, latest))
            }
            State::Ready | State::Warning => {
                let latest = self.handle_any_other_state(object).await?;
                Ok((Action::RequeueAfter(self.config.requeue_interval), latest))
            }
        }
    }

    async fn handle_initial_state(&self, object: &Sample) -> Result<(Action, Sample)> {
        let latest = self
            .apply_divisible_by_three(object, ConditionStatus::Unknown)
            .await?;

        match self.config.state_ownership {
            // Poll until the lifecycle writer sets a state.
            StateOwnership::External => {
                Ok((Action::RequeueAfter(self.config.requeue_interval), latest))
            }
            StateOwnership::Managed => {
                let latest = self.write_state(&latest, State::Processing).await?;
                Ok((Action::RequeueImmediately, latest))
            }
        }
    }

    async fn handle_any_other_state(&self, object: &Sample) -> Result<Sample> {
        let verdict = divisible_by_three(&object.spec.some_number);
        let latest = self.apply_divisible_by_three(object, verdict).await?;

        let settles = self.config.state_ownership == StateOwnership::Managed
            && latest.state() == State::Processing
            && !latest.is_deleting();
        if settles {
            return self.write_state(&latest, self.config.final_state).await;
        }
        Ok(latest)
    }

    /// Write only the `DivisibleByThree` condition. The live transition time
    /// is kept when the value did not change, so a converged object sees a
    /// byte-identical apply.
    async fn apply_divisible_by_three(
        &self,
        object: &Sample,
        verdict: ConditionStatus,
    ) -> Result<Sample> {
        let mut merged = object.status.clone();
        let desired = Condition::divisible_by_three(verdict, object.generation());
        let condition_type = desired.r#type.clone();
        merged.set_condition(desired);

        let partial = SampleStatus {
            conditions: merged
                .condition(&condition_type)
                .cloned()
                .into_iter()
                .collect(),
            ..SampleStatus::default()
        };
        self.conditions.apply(&object.key(), &partial).await
    }

    async fn write_state(&self, object: &Sample, state: State) -> Result<Sample> {
        if !object.state().can_transition_to(state) {
            return Err(Error::state_transition(format!(
                "{}: {} -> {}",
                object.key(),
                object.state(),
                state
            )));
        }
        tracing::info!(key = %object.key(), from = %object.state(), to = %state, "state transition");
        self.lifecycle
            .apply(&object.key(), &SampleStatus::default().with_state(state))
            .await
    }

    async fn begin_deletion(&self, object: &Sample) -> Result<Action> {
        let target = self.config.final_deletion_state;
        self.lifecycle
            .apply(&object.key(), &SampleStatus::default().with_state(target))
            .await?;
        tracing::info!(key = %object.key(), from = %object.state(), to = %target, "deletion observed");
        self.recorder.record(
            &object.key(),
            EventType::Normal,
            "Deleting",
            &format!("object is being deleted; state set to {target}"),
        );
        Ok(Action::RequeueImmediately)
    }

    async fn pause_before_dispatch(&self) {
        let max = self.config.dispatch_jitter;
        if max.is_zero() {
            return;
        }
        let min = Duration::from_millis(1).min(max);
        let pause = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(pause).await;
    }
}
