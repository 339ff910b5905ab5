//! # Payment timeout scheduler
//!
//! A single deadline queue holds at most one pending check per payment. Handles send `Schedule`/`Cancel` commands
//! over a channel to the scheduler task, which sleeps until the earliest deadline and then hands the payment number
//! to the timeout callback.
//!
//! The queue only lives in memory. On start-up, pending deadlines are rebuilt from the persisted payments (see
//! `PaymentFlowApi::rehydrate_timeouts`), and a deadline that already passed fires immediately.
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use log::*;
use tokio::sync::mpsc;

use crate::{db_types::PaymentNo, events::Handler};

#[derive(Debug)]
enum Command {
    Schedule(PaymentNo, DateTime<Utc>),
    Cancel(PaymentNo),
}

/// Deadlines ordered by time, with at most one entry per payment.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    by_deadline: BTreeSet<(DateTime<Utc>, PaymentNo)>,
    by_payment: HashMap<PaymentNo, DateTime<Utc>>,
}

impl DeadlineQueue {
    /// Adds or moves the deadline for `payment_no`.
    pub fn insert(&mut self, payment_no: PaymentNo, deadline: DateTime<Utc>) {
        if let Some(old) = self.by_payment.insert(payment_no.clone(), deadline) {
            self.by_deadline.remove(&(old, payment_no.clone()));
        }
        self.by_deadline.insert((deadline, payment_no));
    }

    pub fn remove(&mut self, payment_no: &PaymentNo) -> bool {
        match self.by_payment.remove(payment_no) {
            Some(deadline) => self.by_deadline.remove(&(deadline, payment_no.clone())),
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.by_deadline.first().map(|(d, _)| *d)
    }

    /// Removes and returns every payment whose deadline is at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<PaymentNo> {
        let mut due = Vec::new();
        while let Some((deadline, _)) = self.by_deadline.first() {
            if *deadline > now {
                break;
            }
            if let Some((_, payment_no)) = self.by_deadline.pop_first() {
                self.by_payment.remove(&payment_no);
                due.push(payment_no);
            }
        }
        due
    }

    pub fn contains(&self, payment_no: &PaymentNo) -> bool {
        self.by_payment.contains_key(payment_no)
    }

    pub fn len(&self) -> usize {
        self.by_payment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_payment.is_empty()
    }
}

/// The sending side of the scheduler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TimeoutSchedulerHandle {
    window: Duration,
    commands: mpsc::UnboundedSender<Command>,
}

impl TimeoutSchedulerHandle {
    /// A handle with no scheduler behind it. Commands are dropped; overdue payments are then only picked up by the
    /// periodic sweep.
    pub fn detached(window: Duration) -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        Self { window, commands }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedules a check one window after `from`.
    pub fn schedule(&self, payment_no: PaymentNo, from: DateTime<Utc>) {
        self.schedule_at(payment_no, from + self.window);
    }

    pub fn schedule_at(&self, payment_no: PaymentNo, deadline: DateTime<Utc>) {
        trace!("🕰️ Scheduling timeout check for {payment_no} at {deadline}");
        self.send(Command::Schedule(payment_no, deadline));
    }

    pub fn cancel(&self, payment_no: &PaymentNo) {
        self.send(Command::Cancel(payment_no.clone()));
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            trace!("🕰️ No scheduler is listening. Dropped {:?}", e.0);
        }
    }
}

pub struct TimeoutScheduler {
    queue: DeadlineQueue,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl TimeoutScheduler {
    pub fn new(window: Duration) -> (Self, TimeoutSchedulerHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Self { queue: DeadlineQueue::default(), commands: receiver };
        (scheduler, TimeoutSchedulerHandle { window, commands: sender })
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Schedule(payment_no, deadline) => self.queue.insert(payment_no, deadline),
            Command::Cancel(payment_no) => {
                if self.queue.remove(&payment_no) {
                    trace!("🕰️ Timeout check for {payment_no} cancelled");
                }
            },
        }
    }

    /// Runs until every handle has been dropped. Each due payment is passed to `on_timeout` on its own task.
    pub async fn run(mut self, on_timeout: Handler<PaymentNo>) {
        info!("🕰️ Payment timeout scheduler started");
        loop {
            let wait = self.queue.next_deadline().map(|d| (d - Utc::now()).to_std().unwrap_or(StdDuration::ZERO));
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                _ = sleep_or_forever(wait) => {
                    for payment_no in self.queue.pop_due(Utc::now()) {
                        debug!("🕰️ Payment {payment_no} reached its deadline");
                        let handler = on_timeout.clone();
                        tokio::spawn(async move { (handler)(payment_no).await });
                    }
                },
            }
        }
        info!("🕰️ Payment timeout scheduler stopped with {} checks outstanding", self.queue.len());
    }
}

async fn sleep_or_forever(wait: Option<StdDuration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}
