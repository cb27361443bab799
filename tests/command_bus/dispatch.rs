use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use sourced_ringbus::{
    BusConfig, Command, CommandError, EventStore, HandlerError, ProducerType, WaitStrategy,
};

use crate::support::{account_bus, balance_of, deposit, open, replay_from_store};

#[test]
fn commands_for_one_aggregate_commit_in_acceptance_order() {
    let t = account_bus(BusConfig::new().with_buffer_size(16));
    t.bus.dispatch(open("acc-1", "alice")).unwrap();
    for amount in 1..=200 {
        t.bus.dispatch(deposit("acc-1", amount)).unwrap();
    }
    let stats = t.bus.stop();
    assert_eq!(stats.succeeded, 201);
    assert_eq!(stats.failed, 0);

    let published = t.events.events_for("acc-1");
    assert_eq!(published.len(), 201);
    for (index, event) in published.iter().enumerate() {
        assert_eq!(event.sequence, index as u64 + 1);
    }
    let amounts: Vec<i64> = published[1..]
        .iter()
        .map(|event| event.decode().unwrap())
        .collect();
    assert_eq!(amounts, (1..=200).collect::<Vec<_>>());

    let account = replay_from_store(&t.store, "acc-1");
    assert_eq!(account.balance, (1..=200).sum::<i64>());
    assert_eq!(account.owner, "alice");
}

#[test]
fn send_returns_handler_result() {
    let t = account_bus(BusConfig::new().with_buffer_size(8));
    t.bus.send(open("acc-1", "bob")).unwrap().wait().unwrap();

    let first = t.bus.send(deposit("acc-1", 40)).unwrap().wait().unwrap();
    assert_eq!(first, json!({ "balance": 40, "version": 2 }));
    let second = t.bus.send(deposit("acc-1", 2)).unwrap().wait().unwrap();
    assert_eq!(second, json!({ "balance": 42, "version": 3 }));
}

#[test]
fn dispatch_with_delivers_outcome_once() {
    let t = account_bus(BusConfig::new().with_buffer_size(8));
    let (tx, rx) = mpsc::channel();

    let opened = tx.clone();
    t.bus
        .dispatch_with(open("acc-1", "carol"), move |outcome| {
            opened.send(outcome.is_ok()).unwrap();
        })
        .unwrap();
    t.bus
        .dispatch_with(deposit("acc-1", -5), move |outcome| {
            tx.send(outcome.is_ok()).unwrap();
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
    t.bus.stop();
    assert!(rx.try_recv().is_err());
}

#[test]
fn concurrent_producers_across_shards() {
    let config = BusConfig::new()
        .with_buffer_size(64)
        .with_producer_type(ProducerType::Multi)
        .with_wait_strategy(WaitStrategy::Yielding)
        .with_invoker_threads(3)
        .with_publisher_threads(2);
    let t = account_bus(config);

    let ids: Vec<String> = (0..8).map(|n| format!("acc-{n}")).collect();
    for id in &ids {
        t.bus.send(open(id, "owner")).unwrap().wait().unwrap();
    }

    thread::scope(|scope| {
        for id in &ids {
            let bus = &t.bus;
            scope.spawn(move || {
                for amount in 1..=100 {
                    bus.dispatch(deposit(id, amount)).unwrap();
                }
            });
        }
    });

    for id in &ids {
        assert_eq!(balance_of(&t.bus, id), 5050);
    }
    let stats = t.bus.stop();
    assert_eq!(stats.succeeded, 8 + 800 + 8);
    assert_eq!(stats.aggregates_loaded, 0);
    assert_eq!(t.store.stored_event_count(), 808);
}

#[test]
fn single_producer_mode_accepts_one_dispatcher() {
    let t = account_bus(
        BusConfig::new()
            .with_buffer_size(4)
            .with_producer_type(ProducerType::Single)
            .with_wait_strategy(WaitStrategy::BusySpin),
    );
    t.bus.dispatch(open("acc-1", "dave")).unwrap();
    for _ in 0..50 {
        t.bus.dispatch(deposit("acc-1", 2)).unwrap();
    }
    assert_eq!(balance_of(&t.bus, "acc-1"), 100);
}

#[test]
fn unknown_command_fails_without_touching_state() {
    let t = account_bus(BusConfig::new().with_buffer_size(8));
    let failure = t
        .bus
        .send(Command::new("Close", "acc-1", vec![]))
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(
        failure.error,
        CommandError::Handler(HandlerError::UnknownCommand(ref name)) if name == "Close"
    ));
    assert_eq!(failure.command.command_name, "Close");
}

#[test]
fn cancelled_registration_stops_routing() {
    let t = account_bus(BusConfig::new().with_buffer_size(8));
    let registration = t.bus.subscribe("Ping", |_, _| Ok(json!("pong")));
    assert_eq!(
        t.bus.send(Command::new("Ping", "p-1", vec![])).unwrap().wait().unwrap(),
        json!("pong")
    );

    assert!(registration.cancel());
    let failure = t
        .bus
        .send(Command::new("Ping", "p-1", vec![]))
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(
        failure.error.handler_error(),
        Some(HandlerError::UnknownCommand(_))
    ));
}

#[test]
fn handlers_cannot_reach_other_aggregates() {
    let t = account_bus(BusConfig::new().with_buffer_size(8));
    t.bus.send(open("acc-1", "erin")).unwrap().wait().unwrap();
    t.bus.send(open("acc-2", "frank")).unwrap().wait().unwrap();

    let accounts = t.accounts.clone();
    t.bus.subscribe("Transfer", move |_, uow| {
        accounts.load(uow, "acc-2")?.deposit(10)?;
        Ok(json!(null))
    });
    let failure = t
        .bus
        .send(Command::new("Transfer", "acc-1", vec![]))
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(matches!(
        failure.error.handler_error(),
        Some(HandlerError::ForeignAggregate { requested, .. }) if requested == "acc-2"
    ));
    assert_eq!(balance_of(&t.bus, "acc-2"), 0);
}

#[test]
fn completion_reports_pending_until_done() {
    let t = account_bus(BusConfig::new().with_buffer_size(8));
    let (release, gate) = mpsc::channel::<()>();
    let gate = std::sync::Mutex::new(gate);
    t.bus.subscribe("Slow", move |_, _| {
        let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
        Ok(json!("done"))
    });

    let completion = t.bus.send(Command::new("Slow", "s-1", vec![])).unwrap();
    assert!(completion.try_result().is_none());
    release.send(()).unwrap();
    let outcome = completion.wait_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.unwrap(), json!("done"));
}

#[test]
fn events_record_the_command_that_caused_them() {
    let t = account_bus(BusConfig::new().with_buffer_size(8));
    t.bus
        .send(open("acc-1", "gus").with_id("open-acc-1"))
        .unwrap()
        .wait()
        .unwrap();
    t.bus
        .send(deposit("acc-1", 3).with_id("deposit-acc-1"))
        .unwrap()
        .wait()
        .unwrap();

    let stored: Vec<_> = t
        .store
        .read_events("acc-1")
        .unwrap()
        .iter()
        .map(|event| event.causation_id().map(str::to_string))
        .collect();
    assert_eq!(
        stored,
        vec![Some("open-acc-1".to_string()), Some("deposit-acc-1".to_string())]
    );

    let published = t.events.events_for("acc-1");
    assert_eq!(published[1].causation_id(), Some("deposit-acc-1"));
}
