// sipwire - SIP user-agent core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Timer durations per RFC 3261 Table 4.
//!
//! Reliable transports skip the wait timers entirely: D, I, J, and K are
//! zero there, and a zero-duration timer never gets armed — the machine
//! takes the transition immediately.

use std::time::Duration;

use crate::TxnTimer;

/// Default T1: estimated round-trip time.
pub const T1_DEFAULT: Duration = Duration::from_millis(500);
/// Default T2: maximum retransmit interval for non-INVITE requests and
/// INVITE final responses.
pub const T2_DEFAULT: Duration = Duration::from_secs(4);
/// Default T4: maximum time a message stays in the network.
pub const T4_DEFAULT: Duration = Duration::from_secs(5);

/// Delay before an INVITE server transaction emits 100 Trying on the TU's
/// behalf.
pub const PROVISIONAL_DELAY: Duration = Duration::from_millis(200);

/// Whether the transport retransmits for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

impl Reliability {
    pub fn is_reliable(self) -> bool {
        matches!(self, Reliability::Reliable)
    }
}

/// Resolves timer durations for one transaction given its transport.
#[derive(Debug, Clone, Copy)]
pub struct TimerTable {
    pub t1: Duration,
    pub t2: Duration,
    pub t4: Duration,
    pub reliability: Reliability,
}

impl TimerTable {
    pub fn new(reliability: Reliability) -> Self {
        Self {
            t1: T1_DEFAULT,
            t2: T2_DEFAULT,
            t4: T4_DEFAULT,
            reliability,
        }
    }

    pub fn with_base(t1: Duration, t2: Duration, t4: Duration, reliability: Reliability) -> Self {
        Self {
            t1,
            t2,
            t4,
            reliability,
        }
    }

    /// True when retransmission timers (A, E, G) should be armed at all.
    pub fn retransmits(&self) -> bool {
        !self.reliability.is_reliable()
    }

    /// Duration for one timer; zero means "take the transition now".
    pub fn duration(&self, timer: TxnTimer) -> Duration {
        let reliable = self.reliability.is_reliable();
        match timer {
            TxnTimer::A | TxnTimer::E | TxnTimer::G => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.t1
                }
            }
            TxnTimer::B | TxnTimer::F | TxnTimer::H => self.t1.saturating_mul(64),
            TxnTimer::D => {
                if reliable {
                    Duration::ZERO
                } else {
                    Duration::from_secs(32)
                }
            }
            TxnTimer::I | TxnTimer::K => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.t4
                }
            }
            TxnTimer::J => {
                if reliable {
                    Duration::ZERO
                } else {
                    self.t1.saturating_mul(64)
                }
            }
            TxnTimer::Provisional => PROVISIONAL_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_timers_zero_on_reliable_transports() {
        let table = TimerTable::new(Reliability::Reliable);
        for timer in [TxnTimer::D, TxnTimer::I, TxnTimer::J, TxnTimer::K] {
            assert_eq!(table.duration(timer), Duration::ZERO, "{timer:?}");
        }
        assert!(!table.retransmits());
    }

    #[test]
    fn timeout_timers_are_64_t1_everywhere() {
        for reliability in [Reliability::Reliable, Reliability::Unreliable] {
            let table = TimerTable::new(reliability);
            for timer in [TxnTimer::B, TxnTimer::F, TxnTimer::H] {
                assert_eq!(table.duration(timer), Duration::from_secs(32), "{timer:?}");
            }
        }
    }

    #[test]
    fn unreliable_wait_timers_follow_table_four() {
        let table = TimerTable::new(Reliability::Unreliable);
        assert_eq!(table.duration(TxnTimer::A), T1_DEFAULT);
        assert_eq!(table.duration(TxnTimer::D), Duration::from_secs(32));
        assert_eq!(table.duration(TxnTimer::I), T4_DEFAULT);
        assert_eq!(table.duration(TxnTimer::J), Duration::from_secs(32));
        assert_eq!(table.duration(TxnTimer::K), T4_DEFAULT);
        assert!(table.retransmits());
    }

    #[test]
    fn custom_t1_scales_the_timeouts() {
        let table = TimerTable::with_base(
            Duration::from_millis(50),
            T2_DEFAULT,
            T4_DEFAULT,
            Reliability::Unreliable,
        );
        assert_eq!(table.duration(TxnTimer::B), Duration::from_millis(3200));
    }
}
