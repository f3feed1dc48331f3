// Copyright (C) 2020-2023 The Strata Team
// This file is part of the strata library.

// The strata library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The strata library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the strata library. If not, see <https://www.gnu.org/licenses/>.

//! Liveness accounting for the background subsystems.
//!
//! Each subsystem touches its item as it makes progress; the status task
//! reports anything that has gone quiet past the timeout. Idle streams are
//! reaped against the same timeout.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Streams and subsystems idle beyond this many seconds are unhealthy.
pub const HEALTH_TIMEOUT: i64 = 600;

pub struct HealthItem {
    name: &'static str,
    last_activity: AtomicI64,
    status: AtomicBool,
}

impl HealthItem {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            last_activity: AtomicI64::new(chrono::Utc::now().timestamp()),
            status: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn touch(&self) {
        self.last_activity
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.status.load(Ordering::SeqCst)
    }

    /// Re-evaluates and records the item's status.
    pub fn check(&self, now: i64) -> bool {
        let healthy = now - self.last_activity() <= HEALTH_TIMEOUT;
        self.status.store(healthy, Ordering::SeqCst);
        healthy
    }

    /// Seconds of quiet remaining before the item reports unhealthy.
    pub fn time_until_fail(&self, now: i64) -> i64 {
        HEALTH_TIMEOUT - (now - self.last_activity())
    }
}

pub struct Health {
    pub tcp_server: HealthItem,
    pub tcp_client: HealthItem,
    pub consensus: HealthItem,
    pub peer: HealthItem,
    pub block_checker: HealthItem,
    pub message_sender: HealthItem,
    pub pool_payer: HealthItem,
    pub cache_validator: HealthItem,
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}

impl Health {
    pub fn new() -> Self {
        Self {
            tcp_server: HealthItem::new("tcp_server"),
            tcp_client: HealthItem::new("tcp_client"),
            consensus: HealthItem::new("consensus"),
            peer: HealthItem::new("peer"),
            block_checker: HealthItem::new("block_checker"),
            message_sender: HealthItem::new("message_sender"),
            pool_payer: HealthItem::new("pool_payer"),
            cache_validator: HealthItem::new("cache_validator"),
        }
    }

    pub fn items(&self) -> [&HealthItem; 8] {
        [
            &self.tcp_server,
            &self.tcp_client,
            &self.consensus,
            &self.peer,
            &self.block_checker,
            &self.message_sender,
            &self.pool_payer,
            &self.cache_validator,
        ]
    }

    /// Re-checks every item; true when all are healthy.
    pub fn check(&self, now: i64) -> bool {
        let mut healthy = true;
        for item in self.items() {
            if !item.check(now) {
                error!("{} health check failed", item.name());
                healthy = false;
            }
        }
        healthy
    }

    pub fn status_line(&self) -> String {
        self.items()
            .iter()
            .map(|item| {
                format!(
                    "{}={}",
                    item.name(),
                    if item.is_healthy() { "ok" } else { "failed" }
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_items_fail_after_the_timeout() {
        let health = Health::new();
        let now = chrono::Utc::now().timestamp();
        assert!(health.check(now));

        assert!(!health.consensus.check(now + HEALTH_TIMEOUT + 1));
        assert!(!health.consensus.is_healthy());

        health.consensus.touch();
        assert!(health.consensus.check(chrono::Utc::now().timestamp()));
    }
}
