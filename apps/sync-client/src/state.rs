//! Reconnect state machine for the push connection.
//!
//! Pure bookkeeping; the run loop in `client` performs the I/O and reports
//! outcomes here.

use std::time::Duration;

use crate::backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped.
    Idle,
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect attempt number `attempt`.
    Backoff { attempt: u32, delay: Duration },
}

#[derive(Debug, Clone)]
pub struct Reconnector {
    state: ConnectionState,
    backoff: Backoff,
}

impl Reconnector {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Idle,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `Idle | Backoff -> Connecting`. Returns `false` if already connecting
    /// or connected.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Idle | ConnectionState::Backoff { .. } => {
                self.state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Connecting | ConnectionState::Connected => false,
        }
    }

    /// `Connecting -> Connected`; clears the failure count.
    pub fn connected(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.backoff.reset();
        true
    }

    /// `Connecting | Connected -> Backoff`. Covers connect failures, errors
    /// and graceful closes alike. Returns the delay to wait, or `None` when
    /// there was no connection attempt to fail.
    pub fn failed(&mut self) -> Option<Duration> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                let delay = self.backoff.next_delay();
                self.state = ConnectionState::Backoff {
                    attempt: self.backoff.attempt(),
                    delay,
                };
                Some(delay)
            }
            ConnectionState::Idle | ConnectionState::Backoff { .. } => None,
        }
    }

    /// Any state `-> Idle`.
    pub fn stop(&mut self) {
        self.state = ConnectionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Reconnector {
        Reconnector::new(Backoff::new(Duration::from_millis(100), Duration::from_millis(400)))
    }

    #[test]
    fn failures_back_off_exponentially() {
        let mut m = machine();
        let mut delays = Vec::new();
        for _ in 0..4 {
            assert!(m.begin_connect());
            delays.push(m.failed().unwrap());
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(400),
            ]
        );
        assert_eq!(
            m.state(),
            ConnectionState::Backoff {
                attempt: 4,
                delay: Duration::from_millis(400)
            }
        );
    }

    #[test]
    fn successful_connect_resets_backoff() {
        let mut m = machine();
        m.begin_connect();
        m.failed();
        m.begin_connect();
        m.failed();

        m.begin_connect();
        assert!(m.connected());
        assert_eq!(m.state(), ConnectionState::Connected);

        // A drop after a good connection starts from the base delay again.
        assert_eq!(m.failed(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn invalid_transitions_are_ignored() {
        let mut m = machine();
        assert!(!m.connected(), "cannot connect without connecting");
        assert_eq!(m.failed(), None, "idle cannot fail");

        m.begin_connect();
        assert!(!m.begin_connect(), "already connecting");
        m.connected();
        assert!(!m.begin_connect(), "already connected");
    }

    #[test]
    fn stop_returns_to_idle_from_anywhere() {
        let mut m = machine();
        m.begin_connect();
        m.failed();
        m.stop();
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.begin_connect());
    }
}
