//! Reconstructing an aggregate from unchanged history is deterministic.

use proptest::prelude::*;
use sourced_ringbus::{Aggregate, BusConfig, EventStore, InMemoryEventStore, InMemorySnapshotStore, RollbackPolicy};

use crate::support::{balance_of, deposit, open, replay_from_store, snapshot_account_bus, withdraw};

fn reload_config() -> ProptestConfig {
    ProptestConfig {
        cases: 16,
        max_shrink_iters: 64,
        ..ProptestConfig::default()
    }
}

#[derive(Debug, Clone)]
enum Op {
    Deposit(i64),
    Withdraw(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-5i64..50).prop_map(Op::Deposit),
        (0i64..80).prop_map(Op::Withdraw),
    ]
}

/// Balance the account should reach; rejected operations leave no trace.
fn expected_balance(ops: &[Op]) -> i64 {
    ops.iter().fold(0, |balance, op| match *op {
        Op::Deposit(amount) if amount > 0 => balance + amount,
        Op::Withdraw(amount) if amount <= balance => balance - amount,
        _ => balance,
    })
}

proptest! {
    #![proptest_config(reload_config())]

    #[test]
    fn reload_from_identical_history_is_identical(
        ops in proptest::collection::vec(op_strategy(), 1..40),
        threshold in 0u64..5,
    ) {
        let store = InMemoryEventStore::new();
        let snapshots = InMemorySnapshotStore::new();
        let config = || {
            BusConfig::new()
                .with_buffer_size(16)
                .with_snapshot_threshold(threshold)
                .with_rollback_policy(RollbackPolicy::Always)
        };

        let writer = snapshot_account_bus(config(), store.clone(), snapshots.clone());
        writer.bus.dispatch(open("acc-1", "yuri")).unwrap();
        for op in &ops {
            let command = match *op {
                Op::Deposit(amount) => deposit("acc-1", amount),
                Op::Withdraw(amount) => withdraw("acc-1", amount),
            };
            writer.bus.dispatch(command).unwrap();
        }
        writer.bus.stop();
        let version = store.last_sequence("acc-1").unwrap();

        // Two independent reloads over the same durable state.
        let first = snapshot_account_bus(config(), store.clone(), snapshots.clone());
        let first_balance = balance_of(&first.bus, "acc-1");
        first.bus.stop();
        let second = snapshot_account_bus(config(), store.clone(), snapshots.clone());
        let second_balance = balance_of(&second.bus, "acc-1");
        second.bus.stop();

        prop_assert_eq!(first_balance, second_balance);
        prop_assert_eq!(first_balance, expected_balance(&ops));
        prop_assert_eq!(store.last_sequence("acc-1").unwrap(), version);

        let replayed = replay_from_store(&store, "acc-1");
        prop_assert_eq!(replayed.version(), version);
        prop_assert_eq!(replayed.balance, first_balance);
        prop_assert_eq!(replayed.owner.as_str(), "yuri");
    }
}
