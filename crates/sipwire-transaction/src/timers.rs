//! Transport-aware timer values per RFC 3261 §17.
//!
//! Transaction timers are scaled by the reliability of the transport that
//! carries the transaction:
//! - **Unreliable transports (UDP)**: full values per RFC 3261 Table 4.
//! - **Reliable transports (TCP/TLS)**: the retransmission timers (A/E/G)
//!   are never needed and the wait timers (D/I/J/K) collapse to zero, so
//!   transactions terminate as soon as their final response is handled.
//!
//! The state machines consult [`TransportAwareTimers`] for every interval
//! they arm; nothing else in the crate hard-codes a duration.

use std::time::Duration;

use crate::TransactionTimer;

/// Transport reliability classes relevant to timer scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Unreliable datagram transport; uses full timer values.
    Udp,
    /// Reliable stream transport; retransmission timers are suppressed.
    Tcp,
    /// Reliable secure stream transport; same scaling as TCP.
    Tls,
}

impl Transport {
    /// Returns true if this is a reliable transport (TCP or TLS).
    pub fn is_reliable(self) -> bool {
        matches!(self, Transport::Tcp | Transport::Tls)
    }

    /// Returns true if this is an unreliable transport (UDP).
    pub fn is_unreliable(self) -> bool {
        matches!(self, Transport::Udp)
    }
}

/// RFC 3261 base timer values (Table 4).
///
/// T1 is the round-trip estimate and MUST NOT be configured below 500ms in
/// production; tests shrink all three to keep suites fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDefaults {
    /// RTT estimate - default 500ms.
    pub t1: Duration,
    /// Maximum retransmit interval for non-INVITE requests - default 4s.
    pub t2: Duration,
    /// Maximum duration a message remains in the network - default 5s.
    pub t4: Duration,
}

impl Default for TimerDefaults {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
        }
    }
}

/// Transport-aware timer value calculator.
#[derive(Debug, Clone, Copy)]
pub struct TransportAwareTimers {
    transport: Transport,
    defaults: TimerDefaults,
}

impl TransportAwareTimers {
    /// Creates a timer calculator for the specified transport with RFC defaults.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            defaults: TimerDefaults::default(),
        }
    }

    /// Creates a timer calculator with custom base timer values.
    pub fn with_defaults(transport: Transport, defaults: TimerDefaults) -> Self {
        Self {
            transport,
            defaults,
        }
    }

    /// Returns the initial duration for a given timer kind.
    ///
    /// A zero duration means the timer is not applicable on this transport;
    /// the state machines fold those into an immediate transition instead of
    /// arming an instantly-firing timer.
    pub fn duration(&self, timer: TransactionTimer) -> Duration {
        match timer {
            // Retransmission timers start at T1 and are absent on
            // reliable transports.
            TransactionTimer::A | TransactionTimer::E | TransactionTimer::G => {
                if self.transport.is_reliable() {
                    Duration::ZERO
                } else {
                    self.defaults.t1
                }
            }

            // Absolute timeouts apply to every transport.
            TransactionTimer::B | TransactionTimer::F | TransactionTimer::H => {
                self.defaults.t1.saturating_mul(64)
            }

            // Wait for response retransmissions after a non-2xx INVITE
            // answer; fixed at 32s per RFC 3261 §17.1.1.2.
            TransactionTimer::D => {
                if self.transport.is_reliable() {
                    Duration::ZERO
                } else {
                    Duration::from_secs(32)
                }
            }

            // Wait for ACK retransmissions (I) / response retransmissions (K).
            TransactionTimer::I | TransactionTimer::K => {
                if self.transport.is_reliable() {
                    Duration::ZERO
                } else {
                    self.defaults.t4
                }
            }

            // Wait for non-INVITE request retransmissions.
            TransactionTimer::J => {
                if self.transport.is_reliable() {
                    Duration::ZERO
                } else {
                    self.defaults.t1.saturating_mul(64)
                }
            }
        }
    }

    /// Returns whether retransmissions are needed on this transport.
    pub fn should_retransmit(&self) -> bool {
        self.transport.is_unreliable()
    }

    /// Returns the transport class.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the base timer values.
    pub fn defaults(&self) -> TimerDefaults {
        self.defaults
    }
}
