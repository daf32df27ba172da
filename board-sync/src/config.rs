//! Client configuration.

use std::time::Duration;

use board_layout::{Size, SnapConfig};

/// Opt-in diagnostic logging, off by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugFlags {
    /// Log every locally created note.
    pub log_create: bool,
    /// Log drag start, end and each transmitted position.
    pub log_drag: bool,
    /// Log every drag frame, including throttled ones.
    pub log_drag_verbose: bool,
    /// Log section title edits and suppressed remote titles.
    pub log_section: bool,
}

/// Settings for the reconnecting transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Full channel URL, e.g. `ws://host:9090/ws/board/main`.
    pub url: String,
    /// Consecutive unplanned closes that each schedule a reconnect.
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Frames held while the socket is not open.
    pub queue_capacity: usize,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Capacity of the event and command channels.
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090/ws/board/default".to_string(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(3000),
            queue_capacity: 10_000,
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
        }
    }
}

/// Board client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Server base URL, e.g. `ws://127.0.0.1:9090`.
    pub server_url: String,
    /// Board to join.
    pub board_id: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
    /// Quiet period before a plain text edit is transmitted.
    pub edit_debounce: Duration,
    /// Minimum spacing of drag position sends.
    pub drag_throttle: Duration,
    /// Forced flush period for a queued drag position.
    pub drag_flush_interval: Duration,
    pub snap: SnapConfig,
    /// Board area notes are clamped into.
    pub container: Size,
    pub channel_capacity: usize,
    pub debug: DebugFlags,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            board_id: "default".to_string(),
            max_reconnect_attempts: transport.max_reconnect_attempts,
            reconnect_delay: transport.reconnect_delay,
            queue_capacity: transport.queue_capacity,
            connect_timeout: transport.connect_timeout,
            edit_debounce: Duration::from_millis(300),
            drag_throttle: Duration::from_millis(90),
            drag_flush_interval: Duration::from_millis(120),
            snap: SnapConfig::default(),
            container: Size::new(1200.0, 600.0),
            channel_capacity: transport.channel_capacity,
            debug: DebugFlags::default(),
        }
    }
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>, board_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            board_id: board_id.into(),
            ..Self::default()
        }
    }

    /// Board channel URL: `{server_url}/ws/board/{board_id}`.
    pub fn channel_url(&self) -> String {
        format!(
            "{}/ws/board/{}",
            self.server_url.trim_end_matches('/'),
            self.board_id
        )
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            url: self.channel_url(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            queue_capacity: self.queue_capacity,
            connect_timeout: self.connect_timeout,
            channel_capacity: self.channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.edit_debounce, Duration::from_millis(300));
        assert_eq!(config.drag_throttle, Duration::from_millis(90));
        assert_eq!(config.drag_flush_interval, Duration::from_millis(120));
        assert_eq!(config.snap.threshold, 8.0);
        assert_eq!(config.debug, DebugFlags::default());
    }

    #[test]
    fn test_channel_url() {
        let config = SyncConfig::new("ws://localhost:8000/", "prod-board");
        assert_eq!(config.channel_url(), "ws://localhost:8000/ws/board/prod-board");
        assert_eq!(config.transport().url, config.channel_url());
    }
}
