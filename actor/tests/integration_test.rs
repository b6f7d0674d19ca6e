// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integrations tests for the actor module

mod common;

use common::{
    Account, AccountCommand, Balance, Gate, GateCommand, Processed,
    create_system, wait_for,
};

use actor::{
    Actor, ActorContext, ActorPath, ActorRef, Error, Handler, Message, Response,
    Sink, Subscriber, SystemEvent,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

use std::time::Duration;

// Records every value it receives.

#[derive(Debug, Default)]
struct Recorder {
    values: Vec<usize>,
}

#[derive(Debug)]
enum RecorderCommand {
    Record(usize),
    /// Records `n`, then tells itself `n - 1` until zero.
    Countdown(usize),
    Values,
}

impl Message for RecorderCommand {}

#[derive(Debug, PartialEq)]
struct Recorded(Vec<usize>);

impl Response for Recorded {}

impl Actor for Recorder {
    type Message = RecorderCommand;
    type Response = Recorded;
}

#[async_trait]
impl Handler<Recorder> for Recorder {
    async fn handle_message(
        &mut self,
        msg: RecorderCommand,
        ctx: &mut ActorContext<Recorder>,
    ) -> Result<Recorded, Error> {
        match msg {
            RecorderCommand::Record(value) => self.values.push(value),
            RecorderCommand::Countdown(value) => {
                self.values.push(value);
                if value > 0 {
                    ctx.reference()
                        .tell(RecorderCommand::Countdown(value - 1))
                        .await?;
                }
            }
            RecorderCommand::Values => {}
        }
        Ok(Recorded(self.values.clone()))
    }
}

// A branch of a bank: owns one account as a child.

#[derive(Debug, Default)]
struct Branch;

#[derive(Debug)]
enum BranchCommand {
    DepositToAccount(u64),
}

impl Message for BranchCommand {}

#[async_trait]
impl Actor for Branch {
    type Message = BranchCommand;
    type Response = Balance;

    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        ctx.create_child("account", Account::default).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler<Branch> for Branch {
    async fn handle_message(
        &mut self,
        msg: BranchCommand,
        ctx: &mut ActorContext<Branch>,
    ) -> Result<Balance, Error> {
        match msg {
            BranchCommand::DepositToAccount(amount) => {
                let account: ActorRef<Account> = ctx
                    .get_child("account")
                    .await
                    .ok_or_else(|| Error::NotFound("account".to_owned()))?;
                account.ask(AccountCommand::Deposit(amount)).await
            }
        }
    }
}

// Fails to start.

#[derive(Debug, Default)]
struct Broken;

#[async_trait]
impl Actor for Broken {
    type Message = RecorderCommand;
    type Response = ();

    async fn pre_start(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Err(Error::Functional("no database".to_owned()))
    }
}

#[async_trait]
impl Handler<Broken> for Broken {
    async fn handle_message(
        &mut self,
        _msg: RecorderCommand,
        _ctx: &mut ActorContext<Broken>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test]
async fn test_bank_account() {
    let (system, _runner, _token) = create_system();
    let account = system.spawn("account", Account::default).await.unwrap();

    assert_eq!(
        account.ask(AccountCommand::Deposit(100)).await,
        Ok(Balance(100))
    );
    assert_eq!(
        account.ask(AccountCommand::Withdraw(150)).await,
        Err(Error::Functional("Insufficient funds".to_owned()))
    );
    // A handler error is a reply, not a fault.
    assert_eq!(
        account.ask(AccountCommand::GetBalance).await,
        Ok(Balance(100))
    );
    assert_eq!(
        account.ask(AccountCommand::Withdraw(40)).await,
        Ok(Balance(60))
    );
}

#[tokio::test]
async fn test_send_by_identity() {
    let (system, _runner, _token) = create_system();
    let account = system.spawn("account", Account::default).await.unwrap();
    let id = account.id();

    system
        .tell::<Account>(id, AccountCommand::Deposit(5))
        .await
        .unwrap();
    let reply = system
        .send::<Account>(id, AccountCommand::Deposit(5))
        .await
        .unwrap();
    assert_eq!(reply.await, Ok(Balance(10)));

    system.stop(id).await.unwrap();

    assert_eq!(
        system.ask::<Account>(id, AccountCommand::GetBalance).await,
        Err(Error::NotFound(id.to_string()))
    );
    // The stale reference sees a closed mailbox.
    assert!(account.is_closed());
    assert_eq!(
        account.tell(AccountCommand::GetBalance).await,
        Err(Error::MailboxClosed(account.path()))
    );
}

#[tokio::test]
async fn test_fifo_order() {
    let (system, _runner, _token) = create_system();
    let recorder = system.spawn("recorder", Recorder::default).await.unwrap();

    for value in 0..200 {
        recorder.tell(RecorderCommand::Record(value)).await.unwrap();
    }
    let Recorded(values) = recorder.ask(RecorderCommand::Values).await.unwrap();
    assert_eq!(values, (0..200).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_tell_itself() {
    let (system, _runner, _token) = create_system();
    let recorder = system.spawn("recorder", Recorder::default).await.unwrap();

    recorder.tell(RecorderCommand::Countdown(5)).await.unwrap();
    let values = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let Recorded(values) =
                recorder.ask(RecorderCommand::Values).await.unwrap();
            if values.len() == 6 {
                return values;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(values, vec![5, 4, 3, 2, 1, 0]);
}

#[tokio::test]
async fn test_cancelled_reply_is_still_processed() {
    let (system, _runner, _token) = create_system();
    let account = system.spawn("account", Account::default).await.unwrap();

    let mut reply = account.send(AccountCommand::Deposit(10)).unwrap();
    reply.cancel();
    assert_eq!(reply.await, Err(Error::ReplyCancelled));

    assert_eq!(
        account.ask(AccountCommand::GetBalance).await,
        Ok(Balance(10))
    );
}

#[tokio::test]
async fn test_stop_resolves_pending_replies() {
    let (system, _runner, _token) = create_system();
    let gate = Gate::default();
    let entered = gate.entered.clone();
    let release = gate.release.clone();
    let gate_ref = system.spawn("gate", move || gate.clone()).await.unwrap();

    let blocked = gate_ref.send(GateCommand::Block).unwrap();
    entered.notified().await;
    let queued: Vec<_> = (0..3)
        .map(|_| gate_ref.send(GateCommand::Count).unwrap())
        .collect();

    let stopping = {
        let system = system.clone();
        let id = gate_ref.id();
        tokio::spawn(async move { system.stop(id).await })
    };
    // Let the stop request reach the gate before it is released.
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_one();

    // The message in progress completes.
    assert_eq!(blocked.await, Ok(Processed(1)));
    for reply in queued {
        assert_eq!(reply.await, Err(Error::ActorStopped(gate_ref.path())));
    }
    stopping.await.unwrap().unwrap();
    assert!(system.get_actor::<Gate>(&gate_ref.path()).await.is_none());
}

#[tokio::test]
async fn test_child_actors() {
    let (system, _runner, _token) = create_system();
    let branch = system.spawn("branch", Branch::default).await.unwrap();
    let account_path = ActorPath::from("/user/branch/account");

    assert_eq!(
        system.children(&branch.path()).await,
        vec![account_path.clone()]
    );
    // The branch awaits its child inside its own handler.
    assert_eq!(
        branch.ask(BranchCommand::DepositToAccount(30)).await,
        Ok(Balance(30))
    );
    assert_eq!(
        branch.ask(BranchCommand::DepositToAccount(12)).await,
        Ok(Balance(42))
    );

    let account: ActorRef<Account> =
        system.get_actor(&account_path).await.unwrap();
    system.stop(branch.id()).await.unwrap();

    // Stopping a parent stops its children.
    assert!(system.get_actor::<Account>(&account_path).await.is_none());
    assert!(account.is_closed());
    assert!(system.children(&ActorPath::from("/user")).await.is_empty());
}

#[tokio::test]
async fn test_failed_start() {
    let (system, _runner, _token) = create_system();
    let result = system.spawn("broken", Broken::default).await;
    assert!(matches!(result, Err(Error::Start(_))));
    assert!(
        system
            .get_actor::<Broken>(&ActorPath::from("/user/broken"))
            .await
            .is_none()
    );
}

struct Forward(mpsc::UnboundedSender<SystemEvent>);

#[async_trait]
impl Subscriber<SystemEvent> for Forward {
    async fn notify(&self, event: SystemEvent) {
        let _ = self.0.send(event);
    }
}

#[tokio::test]
async fn test_lifecycle_events() {
    let (system, runner, token) = create_system();
    let (sender, mut received) = mpsc::unbounded_channel();
    system
        .run_sink(Sink::new(system.subscribe(), Forward(sender)))
        .await;
    let mut events = system.subscribe();

    let account = system.spawn("account", Account::default).await.unwrap();
    system.stop(account.id()).await.unwrap();

    let started = SystemEvent::ActorStarted {
        id: account.id(),
        path: account.path(),
    };
    let stopped = SystemEvent::ActorStopped {
        id: account.id(),
        path: account.path(),
    };
    assert_eq!(wait_for(&mut events, |event| *event == started).await, started);
    assert_eq!(wait_for(&mut events, |event| *event == stopped).await, stopped);

    // The sink sees the same stream.
    assert_eq!(received.recv().await, Some(started));
    assert_eq!(received.recv().await, Some(stopped));

    token.cancel();
    assert_eq!(runner.run().await, Ok(()));
    assert!(system.is_stopped());
    assert!(matches!(
        system.spawn("late", Account::default).await,
        Err(Error::System(_))
    ));
}
