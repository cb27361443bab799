//! Shared aggregate and bus wiring for the command bus tests.

use std::sync::{mpsc, Once};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sourced_ringbus::{
    Aggregate, BusConfig, BusStats, Command, CommandBus, DomainEvent, Entity, EventBus,
    EventStore, HandlerError, InMemoryEventBus, InMemoryEventStore, InMemorySnapshotStore,
    Registration, Repository, RepositoryError, Snapshottable,
};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Default)]
pub struct Account {
    pub entity: Entity,
    pub owner: String,
    pub balance: i64,
    pub deposits: u32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AccountState {
    pub owner: String,
    pub balance: i64,
    pub deposits: u32,
}

impl Account {
    pub fn open(id: &str, owner: &str) -> Result<Self, RepositoryError> {
        let mut account = Account::default();
        account.entity.set_id(id);
        account.apply("Opened", &owner.to_string())?;
        Ok(account)
    }

    pub fn deposit(&mut self, amount: i64) -> Result<(), HandlerError> {
        if amount <= 0 {
            return Err(HandlerError::rejected("deposit must be positive"));
        }
        self.apply("Deposited", &amount)?;
        Ok(())
    }

    pub fn withdraw(&mut self, amount: i64) -> Result<(), HandlerError> {
        if amount > self.balance {
            return Err(HandlerError::rejected("insufficient funds"));
        }
        self.apply("Withdrawn", &amount)?;
        Ok(())
    }

    /// Record an event the test store refuses to persist.
    pub fn poison(&mut self) -> Result<(), HandlerError> {
        self.apply("Poisoned", &())?;
        Ok(())
    }

    fn replay(&mut self, event: &DomainEvent) -> Result<(), String> {
        match event.event_name.as_str() {
            "Opened" => {
                self.owner = event.decode().map_err(|e| e.to_string())?;
            }
            "Deposited" => {
                self.balance += event.decode::<i64>().map_err(|e| e.to_string())?;
                self.deposits += 1;
            }
            "Withdrawn" => {
                self.balance -= event.decode::<i64>().map_err(|e| e.to_string())?;
            }
            "Poisoned" => {}
            other => return Err(format!("unknown event {other}")),
        }
        Ok(())
    }
}

sourced_ringbus::impl_aggregate!(Account, entity, replay);

impl Snapshottable for Account {
    type Snapshot = AccountState;

    fn create_snapshot(&self) -> AccountState {
        AccountState {
            owner: self.owner.clone(),
            balance: self.balance,
            deposits: self.deposits,
        }
    }

    fn restore_from_snapshot(&mut self, snapshot: AccountState) {
        self.owner = snapshot.owner;
        self.balance = snapshot.balance;
        self.deposits = snapshot.deposits;
    }
}

/// Handles `Open`, `Deposit`, `Withdraw`, `Poison` and `Balance` for accounts.
pub fn register_account_handlers(bus: &CommandBus, accounts: Repository<Account>) -> Vec<Registration> {
    let open = {
        let accounts = accounts.clone();
        bus.subscribe("Open", move |command, uow| {
            let owner: String = command.decode()?;
            let id = command.aggregate_id.clone();
            accounts.new_instance(uow, || Ok(Account::open(&id, &owner)?))?;
            Ok(json!({ "opened": command.aggregate_id }))
        })
    };
    let deposit = {
        let accounts = accounts.clone();
        bus.subscribe("Deposit", move |command, uow| {
            let amount: i64 = command.decode()?;
            let account = accounts.load(uow, &command.aggregate_id)?;
            account.deposit(amount)?;
            Ok(json!({ "balance": account.balance, "version": account.version() }))
        })
    };
    let withdraw = {
        let accounts = accounts.clone();
        bus.subscribe("Withdraw", move |command, uow| {
            let amount: i64 = command.decode()?;
            let account = accounts.load(uow, &command.aggregate_id)?;
            account.withdraw(amount)?;
            Ok(json!({ "balance": account.balance }))
        })
    };
    let poison = {
        let accounts = accounts.clone();
        bus.subscribe("Poison", move |command, uow| {
            accounts.load(uow, &command.aggregate_id)?.poison()?;
            Ok(json!(null))
        })
    };
    let balance = bus.subscribe("Balance", move |command, uow| {
        let account = accounts.load(uow, &command.aggregate_id)?;
        Ok(json!({ "balance": account.balance, "deposits": account.deposits }))
    });
    vec![open, deposit, withdraw, poison, balance]
}

pub struct TestBus {
    pub bus: CommandBus,
    pub accounts: Repository<Account>,
    pub store: InMemoryEventStore,
    pub events: InMemoryEventBus,
}

/// A started bus with account handlers over in-memory collaborators.
pub fn account_bus(config: BusConfig) -> TestBus {
    init_tracing();
    let store = InMemoryEventStore::new();
    let events = InMemoryEventBus::new();
    let bus = CommandBus::new(config, store.clone(), events.clone()).unwrap();
    let accounts = bus.create_repository(Account::default);
    register_account_handlers(&bus, accounts.clone());
    bus.start();
    TestBus {
        bus,
        accounts,
        store,
        events,
    }
}

/// Like [`account_bus`], capturing snapshots into `snapshots` and reading
/// history from `store`.
pub fn snapshot_account_bus(
    config: BusConfig,
    store: InMemoryEventStore,
    snapshots: InMemorySnapshotStore,
) -> TestBus {
    init_tracing();
    let events = InMemoryEventBus::new();
    let bus = CommandBus::new(config, store.clone(), events.clone())
        .unwrap()
        .with_snapshot_store(snapshots);
    let accounts = bus.create_snapshot_repository(Account::default);
    register_account_handlers(&bus, accounts.clone());
    bus.start();
    TestBus {
        bus,
        accounts,
        store,
        events,
    }
}

/// A started bus with account handlers over arbitrary collaborators.
pub fn started_account_bus<S, B>(config: BusConfig, store: S, events: B) -> CommandBus
where
    S: EventStore + 'static,
    B: EventBus + 'static,
{
    init_tracing();
    let bus = CommandBus::new(config, store, events).unwrap();
    let accounts = bus.create_repository(Account::default);
    register_account_handlers(&bus, accounts);
    bus.start();
    bus
}

/// Stop `bus` on another thread, failing the test if it does not return in time.
pub fn stop_within(bus: CommandBus, timeout: Duration) -> BusStats {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(bus.stop());
    });
    rx.recv_timeout(timeout).expect("command bus did not stop")
}

pub fn open(id: &str, owner: &str) -> Command {
    Command::encode("Open", id, &owner.to_string()).unwrap()
}

pub fn deposit(id: &str, amount: i64) -> Command {
    Command::encode("Deposit", id, &amount).unwrap()
}

pub fn withdraw(id: &str, amount: i64) -> Command {
    Command::encode("Withdraw", id, &amount).unwrap()
}

pub fn poison(id: &str) -> Command {
    Command::new("Poison", id, vec![])
}

pub fn balance(id: &str) -> Command {
    Command::new("Balance", id, vec![])
}

/// Refuse to store any append containing a `Poisoned` event.
pub fn reject_poison(store: &InMemoryEventStore) {
    store
        .reject_appends_when(|aggregate_id, events| {
            if events.iter().any(|event| event.event_name == "Poisoned") {
                Err(RepositoryError::Storage(format!("refusing poisoned event for {aggregate_id}")))
            } else {
                Ok(())
            }
        })
        .unwrap();
}

/// Balance reported by a `Balance` command.
pub fn balance_of(bus: &CommandBus, id: &str) -> i64 {
    let value = bus.send(balance(id)).unwrap().wait().unwrap();
    value["balance"].as_i64().unwrap()
}

/// Rebuild an account straight from the store's durable history.
pub fn replay_from_store(store: &InMemoryEventStore, id: &str) -> Account {
    let mut account = Account::default();
    account.entity.set_id(id);
    let events = store.read_events(id).unwrap();
    sourced_ringbus::hydrate(&mut account, &events).unwrap();
    account
}
