//! Health monitor.
//!
//! One [`HealthStatus`] per live connection. A periodic tick asks the
//! monitor what to do; the dispatcher carries out the returned actions.
//!
//! ```text
//! quiet > max_quiet_time, nothing outstanding  ─► send HealthCheck
//! outstanding > health_check_timeout           ─► close connection
//! HealthCheckResponse                          ─► clear outstanding
//! ```

use std::collections::HashMap;
use std::time::Instant;

use crate::config::HealthConfig;
use crate::connection::ConnectionId;

/// Health bookkeeping for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthStatus {
    /// When the outstanding check was sent; `None` if nothing is pending.
    pub check_sent_at: Option<Instant>,
    /// Checks sent over the connection's lifetime.
    pub checks_sent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthAction {
    SendCheck(ConnectionId),
    Close(ConnectionId),
}

#[derive(Debug, Default)]
pub(crate) struct HealthMonitor {
    entries: HashMap<ConnectionId, HealthStatus>,
}

impl HealthMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, id: ConnectionId) {
        self.entries.entry(id).or_default();
    }

    pub(crate) fn unregister(&mut self, id: ConnectionId) {
        self.entries.remove(&id);
    }

    pub(crate) fn status(&self, id: ConnectionId) -> Option<HealthStatus> {
        self.entries.get(&id).copied()
    }

    /// Record a `HealthCheckResponse`.
    pub(crate) fn on_response(&mut self, id: ConnectionId) {
        if let Some(status) = self.entries.get_mut(&id) {
            status.check_sent_at = None;
        }
    }

    /// Stamp a check as sent now, unless one is outstanding.
    ///
    /// Returns `true` when the caller should send the check.
    pub(crate) fn force_check(&mut self, id: ConnectionId, now: Instant) -> bool {
        match self.entries.get_mut(&id) {
            Some(status) if status.check_sent_at.is_none() => {
                status.check_sent_at = Some(now);
                status.checks_sent += 1;
                true
            }
            _ => false,
        }
    }

    /// Scan every connection.
    ///
    /// `last_received` gives the time of the last packet seen on a
    /// connection; connections it does not know are skipped.
    pub(crate) fn tick<F>(
        &mut self,
        now: Instant,
        config: &HealthConfig,
        last_received: F,
    ) -> Vec<HealthAction>
    where
        F: Fn(ConnectionId) -> Option<Instant>,
    {
        let mut actions = Vec::new();
        for (&id, status) in self.entries.iter_mut() {
            match status.check_sent_at {
                Some(sent) => {
                    if now.saturating_duration_since(sent) > config.health_check_timeout {
                        actions.push(HealthAction::Close(id));
                    }
                }
                None => {
                    let Some(last) = last_received(id) else {
                        continue;
                    };
                    if now.saturating_duration_since(last) > config.max_quiet_time {
                        status.check_sent_at = Some(now);
                        status.checks_sent += 1;
                        actions.push(HealthAction::SendCheck(id));
                    }
                }
            }
        }
        actions
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
