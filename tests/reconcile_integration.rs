//! Reconciler integration tests: one `reconcile` call at a time against a
//! recording in-memory store.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use sample_operator::controller::{
    Action, ChannelRecorder, Event, EventType, Reconciler, ReleaseOnFinalState,
};
use sample_operator::resource::{
    ConditionStatus, Sample, SampleStatus, State, CONDITION_DIVISIBLE_BY_THREE,
};
use sample_operator::store::{ApplyOptions, ApplyPatch, Store, Subresource};
use sample_operator::types::{ObjectKey, ReconcilerConfig, StateOwnership};
use sample_operator::Error;
use std::sync::Arc;
use tokio::sync::mpsc;

fn reconciler_with(
    store: &Arc<RecordingStore>,
    config: ReconcilerConfig,
) -> (Reconciler, mpsc::Receiver<Event>) {
    let (recorder, events) = ChannelRecorder::new(64);
    let reconciler = Reconciler::new(store.clone(), Arc::new(config), Arc::new(recorder)).unwrap();
    (reconciler, events)
}

fn reconciler(store: &Arc<RecordingStore>) -> Reconciler {
    reconciler_with(store, reconciler_config()).0
}

fn condition_status(sample: &Sample) -> Option<ConditionStatus> {
    sample
        .status
        .condition(CONDITION_DIVISIBLE_BY_THREE)
        .map(|c| c.status)
}

/// Finalizer in place and state set by the external lifecycle writer.
async fn live_sample(
    store: &Arc<RecordingStore>,
    r: &Reconciler,
    name: &str,
    some_number: &str,
    state: State,
) -> ObjectKey {
    let key = create_sample(store, name, some_number).await;
    assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
    set_state(store, &key, state).await;
    store.clear_applies();
    key
}

#[tokio::test]
async fn test_scenario_divisible_by_three() {
    let store = RecordingStore::new();
    let r = reconciler(&store);

    for (name, number, expected) in [
        ("nine", "9", ConditionStatus::True),
        ("ten", "10", ConditionStatus::False),
        ("empty", "", ConditionStatus::False),
        ("word", "three", ConditionStatus::False),
    ] {
        let key = live_sample(&store, &r, name, number, State::Ready).await;
        let action = r.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::RequeueAfter(r.config().requeue_interval));

        let sample = store.get(&key).await.unwrap();
        assert_eq!(condition_status(&sample), Some(expected), "someNumber={number:?}");
        assert_eq!(sample.state(), State::Ready);
    }
}

#[tokio::test]
async fn test_not_found_is_success_without_patch() {
    let store = RecordingStore::new();
    let (r, mut events) = reconciler_with(&store, reconciler_config());

    let action = r.reconcile(&ObjectKey::new("default", "ghost")).await.unwrap();
    assert_eq!(action, Action::NoRequeue);
    assert!(store.applies().is_empty());
    assert!(events.try_recv().is_err(), "no event for a vanished object");
}

#[tokio::test]
async fn test_finalizer_added_before_any_handler() {
    let store = RecordingStore::new();
    let r = reconciler(&store);
    let key = create_sample(&store, "fresh", "9").await;
    set_state(&store, &key, State::Ready).await;
    store.clear_applies();

    assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);

    let applies = store.applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].subresource, Subresource::Main);
    assert!(!applies[0].writes_conditions());

    let sample = store.get(&key).await.unwrap();
    assert!(sample.has_finalizer(&r.config().finalizer));
    assert_eq!(condition_status(&sample), None, "no handler ran in this cycle");

    // Next cycle runs the handler.
    r.reconcile(&key).await.unwrap();
    let sample = store.get(&key).await.unwrap();
    assert_eq!(condition_status(&sample), Some(ConditionStatus::True));
}

#[tokio::test]
async fn test_initial_state_sets_unknown_only() {
    let store = RecordingStore::new();
    let r = reconciler(&store);
    let key = create_sample(&store, "unset", "9").await;
    r.reconcile(&key).await.unwrap();
    store.clear_applies();

    assert_eq!(
        r.reconcile(&key).await.unwrap(),
        Action::RequeueAfter(r.config().requeue_interval)
    );

    let applies = store.applies();
    assert_eq!(applies.len(), 1);
    assert!(applies[0].writes_conditions());
    assert!(!applies[0].writes_state());

    let sample = store.get(&key).await.unwrap();
    assert_eq!(sample.state(), State::Unset);
    assert_eq!(condition_status(&sample), Some(ConditionStatus::Unknown));
}

#[tokio::test]
async fn test_processing_and_error_requeue_immediately() {
    let store = RecordingStore::new();
    let r = reconciler(&store);
    for (name, state) in [("processing", State::Processing), ("error", State::Error)] {
        let key = live_sample(&store, &r, name, "6", state).await;
        assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
        let sample = store.get(&key).await.unwrap();
        assert_eq!(sample.state(), state, "external mode leaves state alone");
        assert_eq!(condition_status(&sample), Some(ConditionStatus::True));
    }
}

#[tokio::test]
async fn test_condition_writer_never_owns_state() {
    let store = RecordingStore::new();
    let r = reconciler(&store);
    let key = live_sample(&store, &r, "owned", "3", State::Warning).await;
    r.reconcile(&key).await.unwrap();

    for patch in store.applies() {
        assert!(!patch.writes_state(), "unexpected state write: {patch:?}");
    }
    let owners = store.inner.managed_fields(&key).await.unwrap();
    assert_eq!(owners[".status.state"], vec![EXTERNAL_LIFECYCLE.to_string()]);
    let condition_owner = &r.config().condition_owner;
    assert!(owners
        .iter()
        .filter(|(path, _)| path.starts_with(".status.conditions"))
        .all(|(_, managers)| managers == &vec![condition_owner.clone()]));
}

#[tokio::test]
async fn test_reconcile_is_idempotent_once_converged() {
    let store = RecordingStore::new();
    let r = reconciler(&store);
    let key = live_sample(&store, &r, "steady", "12", State::Ready).await;

    r.reconcile(&key).await.unwrap();
    let converged = store.get(&key).await.unwrap();
    let owners = store.inner.managed_fields(&key).await.unwrap();

    for _ in 0..3 {
        r.reconcile(&key).await.unwrap();
    }
    let again = store.get(&key).await.unwrap();
    assert_eq!(again, converged);
    assert_eq!(store.inner.managed_fields(&key).await.unwrap(), owners);
}

#[tokio::test]
async fn test_spec_change_refreshes_condition_generation() {
    let store = RecordingStore::new();
    let r = reconciler(&store);
    let key = live_sample(&store, &r, "changing", "9", State::Ready).await;
    r.reconcile(&key).await.unwrap();

    set_some_number(&store, &key, "10").await;
    r.reconcile(&key).await.unwrap();

    let sample = store.get(&key).await.unwrap();
    let condition = sample.status.condition(CONDITION_DIVISIBLE_BY_THREE).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.observed_generation, sample.generation());
    assert_eq!(sample.generation(), 2);
}

#[tokio::test]
async fn test_deletion_patches_state_exactly_once() {
    let store = RecordingStore::new();
    let (r, mut events) = reconciler_with(&store, reconciler_config());
    let key = live_sample(&store, &r, "doomed", "9", State::Ready).await;
    r.reconcile(&key).await.unwrap();

    store.inner.delete(&key).await.unwrap();
    store.clear_applies();
    while events.try_recv().is_ok() {}

    assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
    let applies = store.applies();
    assert_eq!(applies.len(), 1);
    assert!(applies[0].writes_state());
    assert!(!applies[0].writes_conditions());
    assert_eq!(store.get(&key).await.unwrap().state(), State::Deleting);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, EventType::Normal);
    assert_eq!(event.reason, "Deleting");

    for _ in 0..3 {
        assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
    }
    let state_writes = store.applies().iter().filter(|p| p.writes_state()).count();
    assert_eq!(state_writes, 1);

    // External release policy: the object stays until someone else lets go.
    let sample = store.get(&key).await.unwrap();
    assert!(sample.is_deleting());
    assert!(sample.has_finalizer(&r.config().finalizer));
}

#[tokio::test]
async fn test_release_on_final_state_lets_the_store_remove_the_object() {
    let store = RecordingStore::new();
    let r = reconciler(&store).with_release(Arc::new(ReleaseOnFinalState));
    let key = live_sample(&store, &r, "released", "9", State::Ready).await;
    store.inner.delete(&key).await.unwrap();

    assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
    assert_eq!(r.reconcile(&key).await.unwrap(), Action::NoRequeue);
    assert!(store.get(&key).await.unwrap_err().is_not_found());

    assert_eq!(r.reconcile(&key).await.unwrap(), Action::NoRequeue);
}

#[tokio::test]
async fn test_managed_ownership_converges_from_any_state() {
    let store = RecordingStore::new();
    let config = ReconcilerConfig {
        state_ownership: StateOwnership::Managed,
        ..reconciler_config()
    };
    let (r, _events) = reconciler_with(&store, config);

    for (name, start) in [
        ("from-unset", None),
        ("from-processing", Some(State::Processing)),
        ("from-ready", Some(State::Ready)),
        ("from-warning", Some(State::Warning)),
        ("from-error", Some(State::Error)),
    ] {
        let key = create_sample(&store, name, "9").await;
        if let Some(state) = start {
            set_state(&store, &key, state).await;
        }

        let mut settled = false;
        for _ in 0..6 {
            if let Action::RequeueAfter(_) = r.reconcile(&key).await.unwrap() {
                settled = true;
                break;
            }
        }

        let sample = store.get(&key).await.unwrap();
        assert_eq!(
            condition_status(&sample),
            Some(ConditionStatus::True),
            "{name}"
        );
        match start {
            None | Some(State::Processing) => {
                assert!(settled, "{name}");
                assert_eq!(sample.state(), State::Ready, "{name}");
            }
            Some(state) => assert_eq!(sample.state(), state, "{name}"),
        }
    }
}

#[tokio::test]
async fn test_managed_mode_walks_unset_processing_final() {
    let store = RecordingStore::new();
    let config = ReconcilerConfig {
        state_ownership: StateOwnership::Managed,
        final_state: State::Warning,
        ..reconciler_config()
    };
    let (r, _events) = reconciler_with(&store, config);
    let key = create_sample(&store, "walker", "4").await;

    assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
    assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
    assert_eq!(store.get(&key).await.unwrap().state(), State::Processing);

    assert_eq!(r.reconcile(&key).await.unwrap(), Action::RequeueImmediately);
    let sample = store.get(&key).await.unwrap();
    assert_eq!(sample.state(), State::Warning);
    assert_eq!(condition_status(&sample), Some(ConditionStatus::False));

    let owners = store.inner.managed_fields(&key).await.unwrap();
    assert_eq!(owners[".status.state"], vec![r.config().field_owner.clone()]);
}

#[tokio::test]
async fn test_unforced_writer_surfaces_conflict_as_warning_event() {
    let store = RecordingStore::new();
    let (r, mut events) = reconciler_with(&store, reconciler_config());
    let r = r.with_force(false);
    let key = live_sample(&store, &r, "contested", "9", State::Ready).await;

    let rival = SampleStatus::default()
        .with_divisible_by_three_condition_status(ConditionStatus::False, 1);
    store
        .inner
        .apply(
            &key,
            ApplyPatch::new(serde_json::json!({ "status": { "conditions": rival.conditions } })),
            &ApplyOptions::status(manager("rival")),
        )
        .await
        .unwrap();
    while events.try_recv().is_ok() {}

    let err = r.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, EventType::Warning);
    assert_eq!(event.reason, "ApplyConflict");

    // The default forced writer takes the field over.
    let forced = reconciler(&store);
    forced.reconcile(&key).await.unwrap();
    let sample = store.get(&key).await.unwrap();
    assert_eq!(condition_status(&sample), Some(ConditionStatus::True));
}
