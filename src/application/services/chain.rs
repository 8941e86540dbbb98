//! Chain-delay protocol service
//!
//! Reservation and task windows are plain deadlines compared against the
//! injected clock on each call; there are no background timers. The
//! service mutates [`ProtocolData`] in place and leaves persistence to
//! the caller.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use itertools::Itertools;
use tracing::{debug, instrument};

use crate::domain::{ChainError, ChainNode, ProtocolData, Violation};
use crate::infrastructure::traits::Clock;

/// How many archived chains the history keeps.
const HISTORY_LIMIT: usize = 20;

/// State of one countdown window at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Closed,
    Open { remaining_secs: i64 },
    /// Deadline has passed but the window was never resolved.
    Expired,
}

/// Snapshot of both windows and the chain, for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    pub reservation: WindowState,
    pub task: WindowState,
    pub chain_len: usize,
    pub longest_chain: usize,
}

/// Result of completing the running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub node: ChainNode,
    pub chain_len: usize,
    /// Finished before the deadline.
    pub early: bool,
    pub new_record: bool,
}

pub struct ChainService {
    clock: Arc<dyn Clock>,
}

impl ChainService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn window_open(until: Option<NaiveDateTime>, now: NaiveDateTime) -> bool {
        until.is_some_and(|t| t > now)
    }

    fn window_state(until: Option<NaiveDateTime>, now: NaiveDateTime) -> WindowState {
        match until {
            None => WindowState::Closed,
            Some(t) if t > now => WindowState::Open {
                remaining_secs: (t - now).num_seconds(),
            },
            Some(_) => WindowState::Expired,
        }
    }

    /// Open a reservation window: the commitment to start a task before
    /// the deadline. Fails while a reservation or task is still running;
    /// an expired reservation is silently replaced.
    #[instrument(level = "debug", skip(self, data))]
    pub fn start_reservation(
        &self,
        data: &mut ProtocolData,
        minutes: Option<i64>,
    ) -> Result<NaiveDateTime, ChainError> {
        let now = self.clock.now();
        if Self::window_open(data.reservation_until, now) {
            return Err(ChainError::ReservationOpen);
        }
        if Self::window_open(data.task_until, now) {
            return Err(ChainError::TaskRunning);
        }

        let minutes = minutes.unwrap_or(data.settings.reservation_minutes);
        let deadline = now + Duration::minutes(minutes);
        data.reservation_until = Some(deadline);
        debug!("start_reservation: deadline {deadline}");
        Ok(deadline)
    }

    /// Start a task, appending a node to the chain. An open reservation
    /// counts as fulfilled and is closed.
    #[instrument(level = "debug", skip(self, data))]
    pub fn start_task(
        &self,
        data: &mut ProtocolData,
        name: Option<&str>,
        minutes: Option<i64>,
    ) -> Result<ChainNode, ChainError> {
        let now = self.clock.now();
        if Self::window_open(data.task_until, now) {
            return Err(ChainError::TaskRunning);
        }

        data.reservation_until = None;
        let minutes = minutes.unwrap_or(data.settings.task_minutes);
        data.task_until = Some(now + Duration::minutes(minutes));

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let node = ChainNode {
            id: data.task_chain.len() as u32 + 1,
            name: name.unwrap_or("unnamed task").to_string(),
            timestamp: now,
        };
        data.task_chain.push(node.clone());
        debug!("start_task: #{} [{}]", node.id, node.name);
        Ok(node)
    }

    /// Complete the running task. A task past its deadline still
    /// completes on time, mirroring the old auto-completion.
    #[instrument(level = "debug", skip(self, data))]
    pub fn complete_task(&self, data: &mut ProtocolData) -> Result<Completion, ChainError> {
        let now = self.clock.now();
        let deadline = data.task_until.take().ok_or(ChainError::NoTaskRunning)?;
        let node = data
            .task_chain
            .last()
            .cloned()
            .ok_or(ChainError::NoTaskRunning)?;

        let chain_len = data.task_chain.len();
        let new_record = chain_len > data.longest_chain;
        if new_record {
            data.longest_chain = chain_len;
        }

        Ok(Completion {
            node,
            chain_len,
            early: now < deadline,
            new_record,
        })
    }

    /// Abandon the running task window. The chain node stays in place;
    /// breaking the chain is [`reset_chain`](Self::reset_chain)'s job.
    pub fn cancel_task(&self, data: &mut ProtocolData) -> Result<(), ChainError> {
        data.task_until.take().ok_or(ChainError::NoTaskRunning)?;
        Ok(())
    }

    /// Break the chain: archive the current chain string into the
    /// history (keeping the last [`HISTORY_LIMIT`] entries), then clear
    /// the chain and both windows.
    ///
    /// Returns the archived chain string, if there was one.
    #[instrument(level = "debug", skip(self, data))]
    pub fn reset_chain(&self, data: &mut ProtocolData, reason: &str) -> Option<String> {
        let archived = if data.task_chain.is_empty() {
            None
        } else {
            let line = data
                .task_chain
                .iter()
                .map(|n| format!("#{} [{}]", n.id, n.name))
                .join(" -> ");
            data.task_history.push(line.clone());
            let excess = data.task_history.len().saturating_sub(HISTORY_LIMIT);
            if excess > 0 {
                data.task_history.drain(..excess);
            }
            Some(line)
        };

        data.task_chain.clear();
        data.reservation_until = None;
        data.task_until = None;
        debug!("reset_chain: {reason}");
        archived
    }

    /// Permanently allow a behavior so it no longer breaks the chain.
    pub fn allow_violation(&self, data: &mut ProtocolData, description: &str) -> Violation {
        let id = data
            .allowed_violations
            .iter()
            .map(|v| v.id)
            .max()
            .unwrap_or(0)
            + 1;
        let violation = Violation {
            id,
            description: description.trim().to_string(),
            timestamp: self.clock.now(),
            permanent: true,
        };
        data.allowed_violations.push(violation.clone());
        violation
    }

    pub fn status(&self, data: &ProtocolData) -> ChainStatus {
        let now = self.clock.now();
        ChainStatus {
            reservation: Self::window_state(data.reservation_until, now),
            task: Self::window_state(data.task_until, now),
            chain_len: data.task_chain.len(),
            longest_chain: data.longest_chain,
        }
    }
}
