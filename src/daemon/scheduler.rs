// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Periodic task scheduler
//!
//! A single-threaded cooperative timer loop driving named periodic tasks. One
//! invocation of [`PeriodicScheduler::run`] executes every task body serially,
//! so mutable state shared between tasks needs no locking; a body suspends the
//! loop only at its own await points and is never preempted.
//!
//! ## Task modes
//!
//! - [`TaskMode::AtMultiplesOfPeriod`]: first firing at the next wall-clock
//!   multiple of the period after registration. The report flusher uses this
//!   to align file boundaries.
//! - [`TaskMode::AtStart`]: one firing as soon as the loop starts, then every
//!   period.
//! - [`TaskMode::SkipFirst`]: first firing one period after registration.
//!
//! After a firing, the next expiry is the previous expiry plus the period, so
//! a task does not drift with respect to its baseline. If a body overruns its
//! period, the missed firings are coalesced: the expiry jumps to the smallest
//! multiple strictly in the future.
//!
//! Tasks that expire at the same instant fire in registration order.
//!
//! Time is read through the [`Clock`] trait so the tests can drive the loop
//! with a deterministic clock instead of the system timers.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use tokio::sync::Notify;

/// Time source for the scheduler, in UTC epoch seconds.
#[async_trait(?Send)]
pub trait Clock {
    fn now(&self) -> i64;
    async fn sleep_until(&self, deadline: i64);
}

/// Production clock: system time plus tokio timers.
pub struct SystemClock;

#[async_trait(?Send)]
impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    async fn sleep_until(&self, deadline: i64) {
        let remaining_ms = deadline * 1000 - Utc::now().timestamp_millis();
        if remaining_ms > 0 {
            tokio::time::sleep(Duration::from_millis(remaining_ms as u64)).await;
        }
    }
}

/// First-firing policy of a periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// Fire at wall-clock instants that are multiples of the period
    AtMultiplesOfPeriod,
    /// Fire once immediately, then every period
    AtStart,
    /// First firing one period after registration
    SkipFirst,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;
pub type TaskFn = Box<dyn FnMut(i64) -> TaskFuture>;

struct ScheduledTask {
    name: String,
    period: i64,
    expiry: i64,
    cancelled: bool,
    // Taken out of the slot while the body runs
    body: Option<TaskFn>,
}

#[derive(Default)]
struct State {
    tasks: Vec<ScheduledTask>,
    shutdown: bool,
}

/// Round `val` up to the next multiple of `multiple`; exact multiples stay.
fn aligned_up(val: i64, multiple: i64) -> i64 {
    let rem = val.rem_euclid(multiple);
    if rem == 0 {
        val
    } else {
        val + multiple - rem
    }
}

/// Cooperative single-threaded periodic scheduler.
pub struct PeriodicScheduler {
    state: Rc<RefCell<State>>,
    wakeup: Rc<Notify>,
    clock: Rc<dyn Clock>,
}

/// Cancellation/shutdown side of the scheduler, cloneable into task bodies
/// and signal handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Rc<RefCell<State>>,
    wakeup: Rc<Notify>,
}

impl SchedulerHandle {
    /// Detach the named task. An in-flight body runs to completion; only its
    /// future firings are discarded. Returns whether the task existed.
    pub fn cancel(&self, name: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let found = state.tasks.iter_mut().find(|t| t.name == name && !t.cancelled);
        match found {
            Some(task) => {
                info!("periodic task {} CANCELLED", task.name);
                task.cancelled = true;
                self.wakeup.notify_one();
                true
            }
            None => false,
        }
    }

    /// Cancel every task; the loop returns once the current body, if any,
    /// completes.
    pub fn shutdown(&self) {
        let mut state = self.state.borrow_mut();
        state.shutdown = true;
        for task in &mut state.tasks {
            task.cancelled = true;
        }
        self.wakeup.notify_one();
    }
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::with_clock(Rc::new(SystemClock))
    }

    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        PeriodicScheduler {
            state: Rc::new(RefCell::new(State::default())),
            wakeup: Rc::new(Notify::new()),
            clock,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: self.state.clone(),
            wakeup: self.wakeup.clone(),
        }
    }

    /// Register a periodic task. The first expiry is fixed here, relative to
    /// the registration instant, according to `mode`.
    pub fn add_task(
        &self,
        name: impl Into<String>,
        period: Duration,
        mode: TaskMode,
        body: TaskFn,
    ) {
        let name = name.into();
        let period = (period.as_secs() as i64).max(1);
        let now = self.clock.now();

        let expiry = match mode {
            TaskMode::AtMultiplesOfPeriod => aligned_up(now, period),
            TaskMode::AtStart => now,
            TaskMode::SkipFirst => now + period,
        };

        debug!("task {}: period {}s, first expiry {}", name, period, expiry);
        self.state.borrow_mut().tasks.push(ScheduledTask {
            name,
            period,
            expiry,
            cancelled: false,
            body: Some(body),
        });
        self.wakeup.notify_one();
    }

    /// Run the loop until shutdown or until every task is cancelled.
    /// Returns the number of task firings.
    pub async fn run(&self) -> u64 {
        let mut fired: u64 = 0;

        loop {
            let next = {
                let state = self.state.borrow();
                if state.shutdown {
                    break;
                }
                state
                    .tasks
                    .iter()
                    .filter(|t| !t.cancelled)
                    .map(|t| t.expiry)
                    .min()
            };
            let Some(next) = next else { break };

            if next > self.clock.now() {
                tokio::select! {
                    _ = self.clock.sleep_until(next) => {}
                    // A cancel, shutdown or new registration changed the
                    // timetable; recompute
                    _ = self.wakeup.notified() => continue,
                }
            }

            let now = self.clock.now();
            if now < next {
                continue;
            }

            // Fire everything due at this instant, in registration order
            let count = self.state.borrow().tasks.len();
            for index in 0..count {
                if self.state.borrow().shutdown {
                    break;
                }

                let taken = {
                    let mut state = self.state.borrow_mut();
                    let task = &mut state.tasks[index];
                    if task.cancelled || task.expiry > now {
                        None
                    } else {
                        task.body.take()
                    }
                };
                let Some(mut body) = taken else { continue };

                body(now).await;
                fired += 1;

                let after = self.clock.now();
                let mut state = self.state.borrow_mut();
                let task = &mut state.tasks[index];
                task.body = Some(body);
                if !task.cancelled {
                    task.expiry += task.period;
                    while task.expiry <= after {
                        task.expiry += task.period;
                    }
                }
            }
        }

        fired
    }
}

impl Default for PeriodicScheduler {
    fn default() -> Self {
        Self::new()
    }
}
