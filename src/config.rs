//! Ambient timing knobs shared by every endpoint: [`Pmu`](crate::Pmu), [`Pdc`](crate::Pdc) and
//! [`Splitter`](crate::Splitter).

use core::time::Duration;

/// Timeouts used by the PDC and Splitter endpoints.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// How long [`Pdc::get_header`](crate::Pdc::get_header) and
    /// [`Pdc::get_config`](crate::Pdc::get_config) wait for a matching response before giving up
    /// and returning `None`.
    ///
    /// Defaults to 5 seconds, per the spec's default response wait.
    pub response: Duration,

    /// Starting delay before the Splitter's first upstream reconnect attempt.
    ///
    /// Defaults to 1 second.
    pub reconnect_start: Duration,

    /// Upper bound on the Splitter's exponential reconnect backoff.
    ///
    /// Defaults to 30 seconds.
    pub reconnect_max: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            response: Duration::from_secs(5),
            reconnect_start: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Configuration passed to [`Pmu`](crate::Pmu), [`Pdc`](crate::Pdc) and
/// [`Splitter`](crate::Splitter) constructors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Maximum number of frames queued for a single connection before the endpoint considers that
    /// connection a slow consumer and closes it.
    ///
    /// Defaults to 64.
    pub outbound_queue_depth: usize,

    /// Timing knobs for response waits and reconnect backoff.
    pub timeouts: Timeouts,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 64,
            timeouts: Timeouts::default(),
        }
    }
}

/// Exponential backoff sequence used by the Splitter when its upstream connection drops.
///
/// Starts at `timeouts.reconnect_start`, doubles on every call to [`ReconnectBackoff::next`], and
/// saturates at `timeouts.reconnect_max`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    current: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    /// Create a new backoff sequence starting at `timeouts.reconnect_start`.
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            current: timeouts.reconnect_start,
            max: timeouts.reconnect_max,
        }
    }

    /// The delay to wait before the next reconnect attempt. Doubles each call, capped at `max`.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;

        self.current = (self.current * 2).min(self.max);

        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let timeouts = Timeouts {
            reconnect_start: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(8),
            ..Timeouts::default()
        };

        let mut backoff = ReconnectBackoff::new(timeouts);

        assert_eq!(backoff.next(), Duration::from_secs(1));
        assert_eq!(backoff.next(), Duration::from_secs(2));
        assert_eq!(backoff.next(), Duration::from_secs(4));
        assert_eq!(backoff.next(), Duration::from_secs(8));
        assert_eq!(backoff.next(), Duration::from_secs(8));
    }
}
