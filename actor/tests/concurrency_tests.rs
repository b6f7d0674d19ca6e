// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Scheduling under load, nested requests and bounded mailboxes.

mod common;

use common::{
    Account, AccountCommand, Balance, Gate, GateCommand, Processed,
    create_system, create_system_with,
};

use actor::{
    Actor, ActorContext, ActorRef, Error, Handler, MailboxConfig, Message,
    OverflowPolicy, Props, Response, SystemConfig,
};
use async_trait::async_trait;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

// Detects two handlers of the same actor running at the same time.

#[derive(Clone, Default)]
struct Sentinel {
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    handled: usize,
}

#[derive(Debug)]
enum SentinelCommand {
    Touch,
    Handled,
}

impl Message for SentinelCommand {}

#[derive(Debug, PartialEq)]
struct Handled(usize);

impl Response for Handled {}

impl Actor for Sentinel {
    type Message = SentinelCommand;
    type Response = Handled;
}

#[async_trait]
impl Handler<Sentinel> for Sentinel {
    async fn handle_message(
        &mut self,
        msg: SentinelCommand,
        _ctx: &mut ActorContext<Sentinel>,
    ) -> Result<Handled, Error> {
        if let SentinelCommand::Touch = msg {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            self.handled += 1;
            self.busy.store(false, Ordering::SeqCst);
        }
        Ok(Handled(self.handled))
    }
}

// Forwards deposits to an account and answers with its balance.

#[derive(Clone)]
struct Teller {
    account: ActorRef<Account>,
}

#[derive(Debug)]
struct Deposit(u64);

impl Message for Deposit {}

impl Actor for Teller {
    type Message = Deposit;
    type Response = Balance;
}

#[async_trait]
impl Handler<Teller> for Teller {
    async fn handle_message(
        &mut self,
        msg: Deposit,
        _ctx: &mut ActorContext<Teller>,
    ) -> Result<Balance, Error> {
        self.account.ask(AccountCommand::Deposit(msg.0)).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_message_at_a_time() {
    let (system, _runner, _token) = create_system_with(
        SystemConfig::default().with_batch_size(4),
    );
    let sentinel = Sentinel::default();
    let overlaps = sentinel.overlaps.clone();
    let sentinel_ref = system
        .create_root_actor("sentinel", sentinel)
        .await
        .unwrap();

    let mut senders = Vec::new();
    for _ in 0..8 {
        let sentinel_ref = sentinel_ref.clone();
        senders.push(tokio::spawn(async move {
            for _ in 0..250 {
                sentinel_ref.tell(SentinelCommand::Touch).await.unwrap();
            }
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }

    assert_eq!(
        sentinel_ref.ask(SentinelCommand::Handled).await,
        Ok(Handled(2000))
    );
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_actors_make_progress() {
    let (system, _runner, _token) = create_system();
    let mut accounts = Vec::new();
    for n in 0..50 {
        accounts.push(
            system
                .spawn(&format!("account-{}", n), Account::default)
                .await
                .unwrap(),
        );
    }

    let mut tasks = Vec::new();
    for account in &accounts {
        let account = account.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..20 {
                account.tell(AccountCommand::Deposit(1)).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for account in &accounts {
        assert_eq!(
            account.ask(AccountCommand::GetBalance).await,
            Ok(Balance(20))
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nested_requests_do_not_block_workers() {
    let (system, _runner, _token) = create_system();
    let account = system.spawn("account", Account::default).await.unwrap();

    // More tellers than workers, all awaiting the same account.
    let mut tellers = Vec::new();
    for n in 0..8 {
        let teller = Teller {
            account: account.clone(),
        };
        tellers.push(
            system
                .create_root_actor(&format!("teller-{}", n), teller)
                .await
                .unwrap(),
        );
    }

    let mut replies = Vec::new();
    for teller in &tellers {
        for _ in 0..10 {
            replies.push(teller.send(Deposit(1)).unwrap());
        }
    }
    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        let mut completed = 0;
        for reply in replies {
            reply.await.unwrap();
            completed += 1;
        }
        completed
    })
    .await
    .unwrap();

    assert_eq!(completed, 80);
    assert_eq!(
        account.ask(AccountCommand::GetBalance).await,
        Ok(Balance(80))
    );
}

async fn blocked_gate(
    overflow: OverflowPolicy,
) -> (actor::SystemRef, ActorRef<Gate>, Gate) {
    let (system, _runner, _token) = create_system();
    let gate = Gate::default();
    let constructor = gate.clone();
    let props = Props::new(move || constructor.clone())
        .with_mailbox(MailboxConfig::bounded(2, overflow));
    let gate_ref = system.spawn_with("gate", props).await.unwrap();

    gate_ref.tell(GateCommand::Block).await.unwrap();
    // The blocking message left the mailbox.
    gate.entered.notified().await;
    (system, gate_ref, gate)
}

#[tokio::test]
async fn test_bounded_mailbox_rejects() {
    let (_system, gate_ref, gate) = blocked_gate(OverflowPolicy::Reject).await;

    gate_ref.tell(GateCommand::Tick).await.unwrap();
    gate_ref.tell(GateCommand::Tick).await.unwrap();
    assert_eq!(
        gate_ref.tell(GateCommand::Tick).await,
        Err(Error::MailboxFull(gate_ref.path()))
    );
    assert!(matches!(
        gate_ref.send(GateCommand::Count),
        Err(Error::MailboxFull(_))
    ));

    gate.release.notify_one();
    // Room again once the gate drains.
    let count = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match gate_ref.ask(GateCommand::Count).await {
                Ok(Processed(count)) => return count,
                Err(Error::MailboxFull(_)) => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                Err(error) => panic!("unexpected error {}", error),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_bounded_mailbox_drops_newest() {
    let (_system, gate_ref, gate) =
        blocked_gate(OverflowPolicy::DropNewest).await;

    for _ in 0..5 {
        gate_ref.tell(GateCommand::Tick).await.unwrap();
    }
    // Requests are never dropped silently.
    assert!(matches!(
        gate_ref.send(GateCommand::Count),
        Err(Error::MailboxFull(_))
    ));

    gate.release.notify_one();
    let count = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Processed(count)) = gate_ref.ask(GateCommand::Count).await {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    // The block and the two ticks that fitted.
    assert_eq!(count, 3);
}
