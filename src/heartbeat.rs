//! Heart-beat negotiation and liveness tracking.

use std::time::Duration;
use tokio::time::Instant;

/// Period of the User callback when heartbeats are disabled in both
/// directions. With heartbeats enabled the run loop wakes at whatever rate
/// the negotiated timers require, and the User callback rides along.
pub const USER_TICK: Duration = Duration::from_secs(1);

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Values are in milliseconds; missing or invalid fields default to `0`,
/// i.e. "no heartbeat in that direction".
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// `client_out`/`client_in` are the client's CONNECT values (cx, cy);
/// `server_out`/`server_in` are the server's CONNECTED values (sx, sy).
/// A direction is active only when both sides opted in: the client must be
/// willing to send (cx > 0) and the server willing to receive (sy > 0), and
/// symmetrically for the incoming direction. An active direction uses the
/// larger of the two values.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let outgoing = if client_out == 0 || server_in == 0 {
        None
    } else {
        Some(Duration::from_millis(client_out.max(server_in)))
    };
    let incoming = if client_in == 0 || server_out == 0 {
        None
    } else {
        Some(Duration::from_millis(client_in.max(server_out)))
    };
    (outgoing, incoming)
}

/// Tracks negotiated heartbeat timers and the session's last send/receive
/// timestamps.
///
/// The raw negotiated interval is used as the incoming timeout, with no
/// grace multiplier for missed beats.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    outgoing: Option<Duration>,
    incoming: Option<Duration>,
    last_send: Instant,
    last_receive: Instant,
}

impl HeartbeatMonitor {
    /// A monitor with both directions disabled, as before negotiation.
    pub fn disabled() -> Self {
        let now = Instant::now();
        Self {
            outgoing: None,
            incoming: None,
            last_send: now,
            last_receive: now,
        }
    }

    /// Install the negotiated timers and restart both clocks.
    pub fn start(&mut self, outgoing: Option<Duration>, incoming: Option<Duration>) {
        let now = Instant::now();
        self.outgoing = outgoing;
        self.incoming = incoming;
        self.last_send = now;
        self.last_receive = now;
    }

    /// Interval at which the client must produce traffic, if any.
    pub fn outgoing_interval(&self) -> Option<Duration> {
        self.outgoing
    }

    /// Maximum tolerated inbound silence, if any.
    pub fn incoming_timeout(&self) -> Option<Duration> {
        self.incoming
    }

    pub fn record_send(&mut self) {
        self.last_send = Instant::now();
    }

    pub fn record_receive(&mut self) {
        self.last_receive = Instant::now();
    }

    /// Whether an outgoing no-op is owed: nothing was written for a full
    /// outgoing interval.
    pub fn send_due(&self, now: Instant) -> bool {
        match self.outgoing {
            Some(interval) => now >= self.last_send + interval,
            None => false,
        }
    }

    /// Whether the connection must be presumed dead: nothing was received
    /// within the incoming timeout.
    pub fn receive_expired(&self, now: Instant) -> bool {
        match self.incoming {
            Some(timeout) => now >= self.last_receive + timeout,
            None => false,
        }
    }

    /// The next instant the run loop must wake at: the earliest enabled
    /// heartbeat deadline, or `now + USER_TICK` when both directions are
    /// disabled.
    pub fn next_deadline(&self, now: Instant) -> Instant {
        let mut deadline: Option<Instant> = None;
        if let Some(interval) = self.outgoing {
            deadline = Some(self.last_send + interval);
        }
        if let Some(timeout) = self.incoming {
            let candidate = self.last_receive + timeout;
            deadline = Some(match deadline {
                Some(d) => d.min(candidate),
                None => candidate,
            });
        }
        deadline.unwrap_or(now + USER_TICK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_defaults_to_user_tick() {
        let monitor = HeartbeatMonitor::disabled();
        let now = Instant::now();
        assert_eq!(monitor.next_deadline(now), now + USER_TICK);
    }

    #[test]
    fn deadline_tracks_earliest_timer() {
        let mut monitor = HeartbeatMonitor::disabled();
        monitor.start(
            Some(Duration::from_millis(500)),
            Some(Duration::from_millis(2000)),
        );
        let now = Instant::now();
        let deadline = monitor.next_deadline(now);
        assert!(deadline <= now + Duration::from_millis(500));
        monitor.record_send();
        assert!(!monitor.send_due(Instant::now()));
    }
}
