//! Per-source online/offline state machine.
//!
//! ```text
//!              live message                     sweep: now - last_seen > timeout
//!   Offline ─────────────────▶ Online ─────────────────────────────────────▶ Offline
//!      ▲  │                    │  ▲
//!      │  │ replayed message   │  │ any message (last_seen only)
//!      └──┘ (last_seen only)   └──┘
//! ```
//!
//! Timestamps are unix milliseconds supplied by the caller, so the machine is
//! deterministic under test.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::duration::format_clock;

/// A state change of the liveness machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offline → Online at the given time.
    CameOnline(u64),
    /// Online → Offline at the given time.
    WentOffline(u64),
}

/// Liveness record for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Liveness {
    pub online: bool,
    pub last_seen_at: Option<u64>,
    pub connected_at: Option<u64>,
    pub disconnected_at: Option<u64>,
}

impl Liveness {
    /// A source that has never been seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery from the source.
    ///
    /// A replayed (retained) delivery refreshes `last_seen_at` but never
    /// promotes an offline source.
    pub fn observe(&mut self, now: u64, replay: bool) -> Option<Transition> {
        self.last_seen_at = Some(now);
        if self.online || replay {
            return None;
        }
        self.online = true;
        self.connected_at = Some(now);
        self.disconnected_at = None;
        Some(Transition::CameOnline(now))
    }

    /// Apply the timeout rule. Idempotent for a fixed `now`.
    pub fn sweep(&mut self, now: u64, timeout_ms: u64) -> Option<Transition> {
        if !self.online {
            return None;
        }
        let last_seen = self.last_seen_at.unwrap_or(0);
        if now.saturating_sub(last_seen) <= timeout_ms {
            return None;
        }
        self.online = false;
        self.connected_at = None;
        self.disconnected_at = Some(now);
        Some(Transition::WentOffline(now))
    }

    /// Whether the source counts as active for averaging at `now`.
    ///
    /// This is the one liveness query shared with the aggregator: a source
    /// must be online and heard from strictly within the timeout. Between
    /// sweeps a source can still be flagged online while already stale; it is
    /// excluded here rather than averaged until the next sweep, and a source
    /// known only from replayed deliveries is never averaged.
    pub fn is_active(&self, now: u64, timeout_ms: u64) -> bool {
        match self.last_seen_at {
            Some(seen) => self.online && now.saturating_sub(seen) < timeout_ms,
            None => false,
        }
    }

    pub fn ever_seen(&self) -> bool {
        self.last_seen_at.is_some()
    }

    /// Bring a restored record back in line with the state machine invariants.
    pub fn normalized(mut self) -> Self {
        if self.online {
            self.disconnected_at = None;
            if self.connected_at.is_none() {
                self.connected_at = self.last_seen_at;
            }
            if self.last_seen_at.is_none() {
                self.last_seen_at = self.connected_at;
            }
        } else {
            self.connected_at = None;
        }
        self
    }

    /// Derived display status.
    pub fn status(&self) -> LivenessStatus {
        match (self.online, self.connected_at, self.disconnected_at, self.last_seen_at) {
            (true, since, _, _) => LivenessStatus::Online {
                since: since.or(self.last_seen_at).unwrap_or(0),
            },
            (false, _, Some(since), _) => LivenessStatus::Offline { since },
            (false, _, None, Some(last_seen)) => LivenessStatus::SeenNotLive { last_seen },
            (false, _, None, None) => LivenessStatus::NeverConnected,
        }
    }
}

/// Display status derived from a [`Liveness`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    Online { since: u64 },
    Offline { since: u64 },
    /// Known only from replayed deliveries.
    SeenNotLive { last_seen: u64 },
    NeverConnected,
}

impl LivenessStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, LivenessStatus::Online { .. })
    }

    /// Short symbol for table cells.
    pub fn symbol(&self) -> &'static str {
        match self {
            LivenessStatus::Online { .. } => "ON",
            LivenessStatus::Offline { .. } => "OFF",
            LivenessStatus::SeenNotLive { .. } => "IDLE",
            LivenessStatus::NeverConnected => "-",
        }
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessStatus::Online { since } => write!(f, "online since {}", format_clock(*since)),
            LivenessStatus::Offline { since } => {
                write!(f, "offline since {}", format_clock(*since))
            }
            LivenessStatus::SeenNotLive { last_seen } => {
                write!(f, "offline (last report {})", format_clock(*last_seen))
            }
            LivenessStatus::NeverConnected => f.write_str("never connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: u64 = 3_000;

    fn assert_invariant(l: &Liveness) {
        assert!(!(l.connected_at.is_some() && l.disconnected_at.is_some()));
        if l.online {
            assert!(l.connected_at.is_some());
        }
    }

    #[test]
    fn test_initial_state_never_connected() {
        let l = Liveness::new();
        assert!(!l.online);
        assert!(!l.ever_seen());
        assert_eq!(l.status(), LivenessStatus::NeverConnected);
        assert_eq!(l.status().to_string(), "never connected");
    }

    #[test]
    fn test_live_message_promotes() {
        let mut l = Liveness::new();
        assert_eq!(l.observe(1_000, false), Some(Transition::CameOnline(1_000)));
        assert!(l.online);
        assert_eq!(l.connected_at, Some(1_000));
        assert_eq!(l.disconnected_at, None);
        assert_invariant(&l);
    }

    #[test]
    fn test_message_while_online_is_self_loop() {
        let mut l = Liveness::new();
        l.observe(1_000, false);
        assert_eq!(l.observe(2_000, false), None);
        assert_eq!(l.connected_at, Some(1_000));
        assert_eq!(l.last_seen_at, Some(2_000));
    }

    #[test]
    fn test_replay_does_not_promote() {
        let mut l = Liveness::new();
        assert_eq!(l.observe(1_000, true), None);
        assert!(!l.online);
        assert_eq!(l.last_seen_at, Some(1_000));
        assert_eq!(l.status(), LivenessStatus::SeenNotLive { last_seen: 1_000 });
        assert_invariant(&l);
    }

    #[test]
    fn test_sweep_requires_strictly_exceeded_timeout() {
        let mut l = Liveness::new();
        l.observe(0, false);
        assert_eq!(l.sweep(TIMEOUT, TIMEOUT), None);
        assert!(l.online);
        assert_eq!(l.sweep(TIMEOUT + 1, TIMEOUT), Some(Transition::WentOffline(TIMEOUT + 1)));
        assert!(!l.online);
        assert_eq!(l.connected_at, None);
        assert_eq!(l.disconnected_at, Some(TIMEOUT + 1));
        assert_invariant(&l);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let mut once = Liveness::new();
        once.observe(0, false);
        once.sweep(5_000, TIMEOUT);

        let mut twice = once.clone();
        assert_eq!(twice.sweep(5_000, TIMEOUT), None);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reconnect_after_timeout() {
        let mut l = Liveness::new();
        l.observe(0, false);
        l.sweep(10_000, TIMEOUT);
        assert_eq!(l.observe(11_000, false), Some(Transition::CameOnline(11_000)));
        assert_eq!(l.disconnected_at, None);
        assert_invariant(&l);
    }

    #[test]
    fn test_is_active_strict_window() {
        let mut l = Liveness::new();
        l.observe(1_000, false);
        assert!(l.is_active(3_999, TIMEOUT));
        assert!(!l.is_active(4_000, TIMEOUT));

        let mut replayed = Liveness::new();
        replayed.observe(1_000, true);
        assert!(!replayed.is_active(1_500, TIMEOUT));
    }

    #[test]
    fn test_normalized_repairs_restored_record() {
        let restored = Liveness {
            online: true,
            last_seen_at: Some(2_000),
            connected_at: None,
            disconnected_at: Some(1_000),
        }
        .normalized();
        assert_eq!(restored.connected_at, Some(2_000));
        assert_eq!(restored.disconnected_at, None);
        assert_invariant(&restored);
    }

    #[test]
    fn test_status_text_prefixes() {
        let mut l = Liveness::new();
        l.observe(1_000, false);
        assert!(l.status().to_string().starts_with("online since "));
        l.sweep(9_000, TIMEOUT);
        assert!(l.status().to_string().starts_with("offline since "));
    }
}
