// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Actors and helpers shared by the integration tests.

#![allow(dead_code)]

use actor::{
    Actor, ActorContext, ActorSystem, Error, Handler, Message, Response,
    SystemConfig, SystemEvent, SystemRef, SystemRunner,
};
use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, broadcast::error::RecvError};
use tokio_util::sync::CancellationToken;

use std::{sync::Arc, time::Duration};

pub fn create_system() -> (SystemRef, SystemRunner, CancellationToken) {
    create_system_with(SystemConfig::default())
}

pub fn create_system_with(
    config: SystemConfig,
) -> (SystemRef, SystemRunner, CancellationToken) {
    let token = CancellationToken::new();
    let (system, runner) = ActorSystem::create(config, token.clone());
    (system, runner, token)
}

/// Waits for the first event matching `predicate`.
pub async fn wait_for<F>(
    events: &mut broadcast::Receiver<SystemEvent>,
    mut predicate: F,
) -> SystemEvent
where
    F: FnMut(&SystemEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not received in time")
}

// Bank account.

#[derive(Debug, Default, Clone)]
pub struct Account {
    pub balance: u64,
}

#[derive(Debug, Clone)]
pub enum AccountCommand {
    Deposit(u64),
    Withdraw(u64),
    GetBalance,
    /// Panics inside the handler.
    Crash,
    /// Reports a fault through the context.
    Corrupt,
    /// Reports a fault through the context, then panics.
    CorruptThenCrash,
}

impl Message for AccountCommand {}

#[derive(Debug, Clone, PartialEq)]
pub struct Balance(pub u64);

impl Response for Balance {}

impl Actor for Account {
    type Message = AccountCommand;
    type Response = Balance;
}

#[async_trait]
impl Handler<Account> for Account {
    async fn handle_message(
        &mut self,
        msg: AccountCommand,
        ctx: &mut ActorContext<Account>,
    ) -> Result<Balance, Error> {
        match msg {
            AccountCommand::Deposit(amount) => {
                self.balance += amount;
            }
            AccountCommand::Withdraw(amount) => {
                if amount > self.balance {
                    return Err(Error::Functional(
                        "Insufficient funds".to_owned(),
                    ));
                }
                self.balance -= amount;
            }
            AccountCommand::GetBalance => {}
            AccountCommand::Crash => panic!("account crashed"),
            AccountCommand::Corrupt => {
                ctx.fail(Error::Functional("corrupted ledger".to_owned()));
            }
            AccountCommand::CorruptThenCrash => {
                ctx.fail(Error::Functional("corrupted ledger".to_owned()));
                panic!("account crashed");
            }
        }
        Ok(Balance(self.balance))
    }
}

// Gate: blocks its handler until the test releases it.

#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    pub processed: usize,
}

#[derive(Debug, Clone)]
pub enum GateCommand {
    /// Waits for `release`.
    Block,
    /// Waits for `release`, then panics.
    BlockThenCrash,
    Tick,
    Count,
}

impl Message for GateCommand {}

#[derive(Debug, Clone, PartialEq)]
pub struct Processed(pub usize);

impl Response for Processed {}

impl Actor for Gate {
    type Message = GateCommand;
    type Response = Processed;
}

#[async_trait]
impl Handler<Gate> for Gate {
    async fn handle_message(
        &mut self,
        msg: GateCommand,
        _ctx: &mut ActorContext<Gate>,
    ) -> Result<Processed, Error> {
        match msg {
            GateCommand::Block => {
                self.entered.notify_one();
                self.release.notified().await;
                self.processed += 1;
            }
            GateCommand::BlockThenCrash => {
                self.entered.notify_one();
                self.release.notified().await;
                panic!("released into a crash");
            }
            GateCommand::Tick => self.processed += 1,
            GateCommand::Count => {}
        }
        Ok(Processed(self.processed))
    }
}
