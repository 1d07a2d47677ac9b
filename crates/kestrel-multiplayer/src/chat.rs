//! Text chat: server-side validation and relay, client-side history.
//!
//! The server checks each incoming `CMSG` against length, empty and
//! rate-limit rules ([`ChatConfig`]) and relays accepted lines, prefixed with
//! the sender's name, to every connected host. Clients keep the most recent
//! lines in a bounded [`ChatLog`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

/// Server-side chat rules.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Maximum allowed message length in bytes.
    pub max_message_length: usize,
    /// Maximum messages allowed within the rate-limit window.
    pub rate_limit_messages: u32,
    /// Duration of the sliding rate-limit window.
    pub rate_limit_window: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 256,
            rate_limit_messages: 5,
            rate_limit_window: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// RateTracker
// ---------------------------------------------------------------------------

/// Per-connection sliding-window rate tracker.
#[derive(Debug, Clone)]
pub struct RateTracker {
    timestamps: VecDeque<Instant>,
    max_count: u32,
    window: Duration,
}

impl RateTracker {
    pub fn new(max_count: u32, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            max_count,
            window,
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.rate_limit_messages, config.rate_limit_window)
    }

    /// Returns `true` and records the current instant if the sender is
    /// within the rate limit.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        while self
            .timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            self.timestamps.pop_front();
        }
        if self.timestamps.len() as u32 >= self.max_count {
            return false;
        }
        self.timestamps.push_back(now);
        true
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Reason a chat message was rejected by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRejection {
    /// Message exceeds [`ChatConfig::max_message_length`].
    TooLong,
    /// Message is empty or whitespace-only.
    Empty,
    /// Sender exceeded the per-window rate limit.
    RateLimited,
}

impl std::fmt::Display for ChatRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChatRejection::TooLong => "message too long",
            ChatRejection::Empty => "message empty",
            ChatRejection::RateLimited => "rate limited",
        })
    }
}

/// Checks `text` against `config` and the sender's `rate_tracker`.
pub fn validate_chat_message(
    config: &ChatConfig,
    rate_tracker: &mut RateTracker,
    text: &str,
) -> Result<(), ChatRejection> {
    if text.len() > config.max_message_length {
        return Err(ChatRejection::TooLong);
    }
    if text.trim().is_empty() {
        return Err(ChatRejection::Empty);
    }
    if !rate_tracker.allow() {
        return Err(ChatRejection::RateLimited);
    }
    Ok(())
}

/// Text relayed for a line from `sender`.
pub fn relay_line(sender: Option<&str>, text: &str) -> String {
    match sender {
        Some(name) if !name.is_empty() => format!("{name}: {text}"),
        _ => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ChatLog
// ---------------------------------------------------------------------------

/// Most recent chat lines, oldest first.
#[derive(Debug, Clone)]
pub struct ChatLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn latest(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(100)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tracker(config: &ChatConfig) -> RateTracker {
        RateTracker::from_config(config)
    }

    #[test]
    fn test_valid_message_accepted() {
        let config = ChatConfig::default();
        let mut tracker = make_tracker(&config);
        assert!(validate_chat_message(&config, &mut tracker, "Hello").is_ok());
    }

    #[test]
    fn test_message_length_limit_enforced() {
        let config = ChatConfig::default();
        let mut tracker = make_tracker(&config);
        assert_eq!(
            validate_chat_message(&config, &mut tracker, &"x".repeat(300)),
            Err(ChatRejection::TooLong)
        );
    }

    #[test]
    fn test_whitespace_rejected() {
        let config = ChatConfig::default();
        let mut tracker = make_tracker(&config);
        assert_eq!(
            validate_chat_message(&config, &mut tracker, "  \t "),
            Err(ChatRejection::Empty)
        );
    }

    #[test]
    fn test_rate_limiting_prevents_spam() {
        let config = ChatConfig::default();
        let mut tracker = make_tracker(&config);
        for _ in 0..5 {
            assert!(validate_chat_message(&config, &mut tracker, "msg").is_ok());
        }
        assert_eq!(
            validate_chat_message(&config, &mut tracker, "msg"),
            Err(ChatRejection::RateLimited)
        );
    }

    #[test]
    fn test_rate_window_slides() {
        let mut tracker = RateTracker::new(2, Duration::from_secs(10));
        let start = Instant::now();
        assert!(tracker.allow_at(start));
        assert!(tracker.allow_at(start + Duration::from_secs(1)));
        assert!(!tracker.allow_at(start + Duration::from_secs(2)));
        assert!(tracker.allow_at(start + Duration::from_secs(11)));
    }

    #[test]
    fn test_relay_line_prefixes_name() {
        assert_eq!(relay_line(Some("Ann"), "hi"), "Ann: hi");
        assert_eq!(relay_line(Some(""), "hi"), "hi");
        assert_eq!(relay_line(None, "hi"), "hi");
    }

    #[test]
    fn test_log_is_bounded() {
        let mut log = ChatLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.len(), 2);
        assert_eq!(log.iter().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(log.latest(), Some("c"));
    }
}
