// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::Duration;

use sipwire_transaction::timers::{Reliability, T1_DEFAULT, T2_DEFAULT, T4_DEFAULT};
use sipwire_transaction::TimerTable;

use crate::end_point::Protocol;

/// Tunables for the network layer.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// Estimated round-trip time (RFC 3261 T1).
    pub t1: Duration,
    /// Maximum retransmit interval (T2).
    pub t2: Duration,
    /// Maximum message lifetime in the network (T4).
    pub t4: Duration,
    /// How long an unused channel lingers before teardown.
    pub idle_channel_timeout: Duration,
    /// Protocols whose transports retransmit for us, skipping the wait
    /// timers.
    pub reliable_transports: Vec<Protocol>,
    /// When set, requests whose branch lacks the RFC 3261 magic cookie
    /// are rejected instead of matched by the RFC 2543 fallback.
    pub enforce_rfc3261_branch: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            t1: T1_DEFAULT,
            t2: T2_DEFAULT,
            t4: T4_DEFAULT,
            // 64*T1, same ceiling as the transaction timeout timers.
            idle_channel_timeout: T1_DEFAULT.saturating_mul(64),
            reliable_transports: vec![Protocol::Tcp, Protocol::Tls, Protocol::Sctp],
            enforce_rfc3261_branch: false,
        }
    }
}

impl NetworkSettings {
    pub fn reliability(&self, protocol: Protocol) -> Reliability {
        if self.reliable_transports.contains(&protocol) {
            Reliability::Reliable
        } else {
            Reliability::Unreliable
        }
    }

    /// Timer table for a transaction running over `protocol`.
    pub fn timer_table(&self, protocol: Protocol) -> TimerTable {
        TimerTable::with_base(self.t1, self.t2, self.t4, self.reliability(protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc_values() {
        let settings = NetworkSettings::default();
        assert_eq!(settings.t1, Duration::from_millis(500));
        assert_eq!(settings.t2, Duration::from_secs(4));
        assert_eq!(settings.t4, Duration::from_secs(5));
        assert_eq!(settings.idle_channel_timeout, Duration::from_secs(32));
        assert!(!settings.enforce_rfc3261_branch);
    }

    #[test]
    fn stream_transports_are_reliable_by_default() {
        let settings = NetworkSettings::default();
        assert_eq!(settings.reliability(Protocol::Udp), Reliability::Unreliable);
        for proto in [Protocol::Tcp, Protocol::Tls, Protocol::Sctp] {
            assert_eq!(settings.reliability(proto), Reliability::Reliable);
        }
        // WebSocket transports are not in the default reliable set; they
        // are out of scope and an embedder wiring them up decides.
        assert_eq!(settings.reliability(Protocol::Ws), Reliability::Unreliable);
    }
}
