use std::time::Duration;

use sourced_ringbus::{
    BusConfig, CommandBus, EventStore, InMemoryEventStore, InMemorySnapshotStore, NoopEventBus,
    RepositoryError, SnapshotRecord, SnapshotStore,
};

use crate::support::{
    account_bus, balance_of, deposit, init_tracing, open, register_account_handlers,
    snapshot_account_bus, stop_within, Account, AccountState,
};

/// Snapshot store that panics on every save.
struct CrashingSnapshots;

impl SnapshotStore for CrashingSnapshots {
    fn get_snapshot(&self, _: &str) -> Result<Option<SnapshotRecord>, RepositoryError> {
        Ok(None)
    }

    fn save_snapshot(&self, _: SnapshotRecord) -> Result<(), RepositoryError> {
        panic!("snapshot volume unmounted");
    }

    fn delete_snapshot(&self, _: &str) -> Result<bool, RepositoryError> {
        Ok(false)
    }
}

fn tampered(id: &str, version: u64, balance: i64) -> SnapshotRecord {
    let state = AccountState {
        owner: "snapshot".into(),
        balance,
        deposits: 0,
    };
    SnapshotRecord {
        aggregate_id: id.into(),
        version,
        data: bitcode::serialize(&state).unwrap(),
    }
}

#[test]
fn snapshots_are_captured_at_threshold() {
    let store = InMemoryEventStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let t = snapshot_account_bus(
        BusConfig::new().with_buffer_size(8).with_snapshot_threshold(3),
        store,
        snapshots.clone(),
    );

    t.bus.send(open("acc-1", "tess")).unwrap().wait().unwrap();
    t.bus.send(deposit("acc-1", 1)).unwrap().wait().unwrap();
    assert!(snapshots.get_snapshot("acc-1").unwrap().is_none());

    t.bus.send(deposit("acc-1", 2)).unwrap().wait().unwrap();
    assert_eq!(snapshots.get_snapshot("acc-1").unwrap().unwrap().version, 3);

    for amount in 3..=6 {
        t.bus.send(deposit("acc-1", amount)).unwrap().wait().unwrap();
    }
    let snapshot = snapshots.get_snapshot("acc-1").unwrap().unwrap();
    assert_eq!(snapshot.version, 6);
    let state: AccountState = bitcode::deserialize(&snapshot.data).unwrap();
    assert_eq!(state.balance, 1 + 2 + 3 + 4 + 5);
    assert_eq!(state.owner, "tess");
}

#[test]
fn reload_starts_from_snapshot_and_replays_the_rest() {
    let store = InMemoryEventStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let first = snapshot_account_bus(
        BusConfig::new().with_buffer_size(8).with_snapshot_threshold(2),
        store.clone(),
        snapshots.clone(),
    );
    first.bus.send(open("acc-1", "uma")).unwrap().wait().unwrap();
    first.bus.send(deposit("acc-1", 10)).unwrap().wait().unwrap();
    first.bus.send(deposit("acc-1", 20)).unwrap().wait().unwrap();
    first.bus.stop();
    assert_eq!(snapshots.get_snapshot("acc-1").unwrap().unwrap().version, 2);
    assert_eq!(store.last_sequence("acc-1").unwrap(), 3);

    // A recognisable snapshot proves the reload used it and replayed only event 3.
    snapshots.delete_snapshot("acc-1").unwrap();
    snapshots.save_snapshot(tampered("acc-1", 2, 1_000)).unwrap();

    let second = snapshot_account_bus(
        BusConfig::new().with_buffer_size(8).with_snapshot_threshold(2),
        store.clone(),
        snapshots.clone(),
    );
    assert_eq!(balance_of(&second.bus, "acc-1"), 1_020);
    assert_eq!(second.bus.stats().aggregates_loaded, 1);
}

#[test]
fn snapshot_ahead_of_the_store_is_ignored() {
    let store = InMemoryEventStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let first = snapshot_account_bus(BusConfig::new().with_buffer_size(8), store.clone(), snapshots.clone());
    first.bus.send(open("acc-1", "vera")).unwrap().wait().unwrap();
    first.bus.send(deposit("acc-1", 7)).unwrap().wait().unwrap();
    first.bus.stop();

    // Covers events that were never committed.
    snapshots.save_snapshot(tampered("acc-1", 50, 999)).unwrap();

    let second = snapshot_account_bus(BusConfig::new().with_buffer_size(8), store, snapshots);
    assert_eq!(balance_of(&second.bus, "acc-1"), 7);
}

#[test]
fn plain_repositories_never_snapshot() {
    let t = account_bus(BusConfig::new().with_buffer_size(8).with_snapshot_threshold(1));
    t.bus.send(open("acc-1", "walt")).unwrap().wait().unwrap();
    t.bus.send(deposit("acc-1", 1)).unwrap().wait().unwrap();
    assert!(!t.accounts.is_snapshot_enabled());
    assert_eq!(t.store.read_events("acc-1").unwrap().len(), 2);
}

#[test]
fn zero_threshold_disables_capture() {
    let snapshots = InMemorySnapshotStore::new();
    let t = snapshot_account_bus(
        BusConfig::new().with_buffer_size(8),
        InMemoryEventStore::new(),
        snapshots.clone(),
    );
    t.bus.send(open("acc-1", "xia")).unwrap().wait().unwrap();
    for _ in 0..5 {
        t.bus.send(deposit("acc-1", 1)).unwrap().wait().unwrap();
    }
    t.bus.stop();
    assert!(snapshots.is_empty());
}

#[test]
fn panicking_snapshot_store_does_not_fail_commands() {
    init_tracing();
    let store = InMemoryEventStore::new();
    let bus = CommandBus::new(
        BusConfig::new().with_buffer_size(8).with_snapshot_threshold(1),
        store.clone(),
        NoopEventBus,
    )
    .unwrap()
    .with_snapshot_store(CrashingSnapshots);
    let accounts = bus.create_snapshot_repository(Account::default);
    register_account_handlers(&bus, accounts);
    bus.start();

    bus.send(open("acc-1", "yann")).unwrap().wait().unwrap();
    bus.send(deposit("acc-1", 4)).unwrap().wait().unwrap();
    assert_eq!(balance_of(&bus, "acc-1"), 4);

    let stats = stop_within(bus, Duration::from_secs(5));
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(store.last_sequence("acc-1").unwrap(), 2);
}
