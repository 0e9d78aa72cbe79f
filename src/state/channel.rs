//! Realtime channel session management.
//!
//! A [`ChannelSession`] wraps one named publish/subscribe channel. It owns
//! the subscribe lifecycle: listener registration, outcome classification,
//! exponential backoff with jitter, manual reconnect, topic changes, and
//! teardown.
//!
//! The session performs no I/O of its own. Subscribe attempts are initiated
//! through a [`RealtimeTransport`]; their outcomes are fed back through
//! [`ChannelSession::handle_status`]. Retry timers are driven by the host
//! calling [`ChannelSession::poll_timers`] with the current instant.
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────────────┐ connect/reconnect ┌────────────┐  SUBSCRIBED  ┌───────────┐
//! │ Disconnected │──────────────────▶│ Connecting │─────────────▶│ Connected │
//! └──────────────┘                   └─────┬──────┘              └─────┬─────┘
//!        ▲                                 │ TIMED_OUT / CHANNEL_ERROR │
//!        │        backoff timer fires      │ / CLOSED                  │
//!        └─────────────────────────────────┴───────────────────────────┘
//!
//!   RATE_LIMITED / UNAUTHORIZED / budget spent ──▶ retry_exhausted
//!   (only reconnect() leaves it)
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::config::RetryConfig;

/// Build the channel name for a room topic, e.g. `room:42:cards`.
pub fn room_topic(room_id: &str, topic: &str) -> String {
    format!("room:{}:{}", room_id, topic)
}

/// A typed message carried over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Event name used for listener routing
    pub event: String,

    /// Arbitrary payload
    #[serde(default)]
    pub payload: Value,
}

impl ChannelMessage {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Outcome reported by the transport for a subscribe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscribeStatus {
    Subscribed,
    TimedOut,
    ChannelError,
    Closed,
}

impl SubscribeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribed => "SUBSCRIBED",
            Self::TimedOut => "TIMED_OUT",
            Self::ChannelError => "CHANNEL_ERROR",
            Self::Closed => "CLOSED",
        }
    }
}

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Classification of the last subscribe failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelErrorType {
    TimedOut,
    ChannelError,
    Closed,
    /// Too many requests; never retried automatically
    RateLimited,
    /// Credentials rejected; never retried automatically
    Unauthorized,
}

impl ChannelErrorType {
    /// Classify a failed subscribe outcome.
    ///
    /// The error message takes precedence over the status: a `CHANNEL_ERROR`
    /// whose message mentions a 429 is a rate limit, not a retryable error.
    /// Returns `None` for `SUBSCRIBED`.
    pub fn classify(status: SubscribeStatus, message: Option<&str>) -> Option<Self> {
        if let Some(message) = message {
            let lower = message.to_ascii_lowercase();
            if lower.contains("429")
                || lower.contains("too many requests")
                || lower.contains("rate limit")
            {
                return Some(Self::RateLimited);
            }
            if lower.contains("401") || lower.contains("unauthorized") {
                return Some(Self::Unauthorized);
            }
        }
        match status {
            SubscribeStatus::Subscribed => None,
            SubscribeStatus::TimedOut => Some(Self::TimedOut),
            SubscribeStatus::ChannelError => Some(Self::ChannelError),
            SubscribeStatus::Closed => Some(Self::Closed),
        }
    }

    /// Terminal errors stop automatic retries.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unauthorized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimedOut => "TIMED_OUT",
            Self::ChannelError => "CHANNEL_ERROR",
            Self::Closed => "CLOSED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}

/// Errors returned from outbound channel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Channel {0} is not connected")]
    NotConnected(String),

    #[error("Channel session has been disposed")]
    Disposed,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// The publish/subscribe collaborator underneath a session.
///
/// `subscribe` only initiates an attempt; its outcome must be reported to
/// the owning session via [`ChannelSession::handle_status`].
pub trait RealtimeTransport {
    fn subscribe(&mut self, topic: &str);

    fn send(&mut self, topic: &str, message: &ChannelMessage) -> Result<(), ChannelError>;

    fn unsubscribe(&mut self, topic: &str);
}

type Handler = Box<dyn FnMut(&Value)>;

/// Event-name keyed message handlers for one channel.
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: HashMap<String, Vec<Handler>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name.
    pub fn on(
        &mut self,
        event: impl Into<String>,
        handler: impl FnMut(&Value) + 'static,
    ) -> &mut Self {
        self.handlers
            .entry(event.into())
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Check if any handler listens for an event name.
    pub fn listens_to(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Count distinct event names with handlers.
    pub fn event_count(&self) -> usize {
        self.handlers.len()
    }

    /// Run every handler registered for the message's event.
    /// Returns how many handlers ran.
    fn dispatch(&mut self, message: &ChannelMessage) -> usize {
        match self.handlers.get_mut(&message.event) {
            Some(handlers) => {
                for handler in handlers.iter_mut() {
                    handler(&message.payload);
                }
                handlers.len()
            }
            None => 0,
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<&String> = self.handlers.keys().collect();
        events.sort();
        f.debug_struct("ListenerRegistry")
            .field("events", &events)
            .finish()
    }
}

/// What `handle_status` did with a subscribe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The channel is now subscribed
    Connected,
    /// A retry is scheduled
    Retrying { attempt: u32, delay: Duration },
    /// The retry budget is spent
    Exhausted,
    /// Terminal failure; only `reconnect()` will try again
    Terminal(ChannelErrorType),
    /// Outcome arrived after disposal or while a retry was already pending
    Ignored,
}

/// Read-only view of a session for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatusView {
    pub topic: String,
    pub is_connected: bool,
    pub error: Option<String>,
    pub error_type: Option<ChannelErrorType>,
    pub is_retrying: bool,
    pub remaining_retries: u32,
    pub retry_exhausted: bool,
}

/// One subscription to a named channel.
pub struct ChannelSession<T: RealtimeTransport> {
    topic: String,
    transport: T,
    retry: RetryConfig,
    setup: Box<dyn Fn(&mut ListenerRegistry)>,
    listeners: ListenerRegistry,
    status: ConnectionStatus,
    error: Option<String>,
    error_type: Option<ChannelErrorType>,
    remaining_retries: u32,
    retry_exhausted: bool,
    retry_at: Option<Instant>,
    subscribe_attempts: u64,
    disposed: bool,
}

impl<T: RealtimeTransport> ChannelSession<T> {
    /// Open a session: run `setup` to register listeners, then subscribe.
    ///
    /// Listeners are in place before the subscribe call, so anything the
    /// transport delivers during the handshake reaches them.
    pub fn connect(
        topic: impl Into<String>,
        transport: T,
        retry: RetryConfig,
        setup: impl Fn(&mut ListenerRegistry) + 'static,
    ) -> Self {
        let mut listeners = ListenerRegistry::new();
        setup(&mut listeners);

        let mut session = Self {
            topic: topic.into(),
            transport,
            remaining_retries: retry.max_retries,
            retry,
            setup: Box::new(setup),
            listeners,
            status: ConnectionStatus::Disconnected,
            error: None,
            error_type: None,
            retry_exhausted: false,
            retry_at: None,
            subscribe_attempts: 0,
            disposed: false,
        };
        session.subscribe_now();
        session
    }

    fn subscribe_now(&mut self) {
        if self.disposed {
            return;
        }
        self.status = ConnectionStatus::Connecting;
        self.subscribe_attempts += 1;
        debug!(
            target: "consult_sync.channel",
            topic = %self.topic,
            attempt = self.subscribe_attempts,
            "Subscribing"
        );
        self.transport.subscribe(&self.topic);
    }

    fn reset_retry_state(&mut self) {
        self.retry_at = None;
        self.remaining_retries = self.retry.max_retries;
        self.retry_exhausted = false;
        self.error = None;
        self.error_type = None;
    }

    /// Feed the outcome of a subscribe attempt into the session.
    pub fn handle_status(
        &mut self,
        status: SubscribeStatus,
        error: Option<&str>,
        now: Instant,
    ) -> StatusOutcome {
        if self.disposed {
            trace!(
                target: "consult_sync.channel",
                topic = %self.topic,
                "Status after dispose ignored"
            );
            return StatusOutcome::Ignored;
        }

        let error_type = match ChannelErrorType::classify(status, error) {
            None => {
                self.reset_retry_state();
                self.status = ConnectionStatus::Connected;
                info!(target: "consult_sync.channel", topic = %self.topic, "Channel subscribed");
                return StatusOutcome::Connected;
            }
            Some(error_type) => error_type,
        };

        let message = error.unwrap_or(status.as_str()).to_string();
        self.status = ConnectionStatus::Disconnected;
        self.error_type = Some(error_type);

        if error_type.is_terminal() {
            self.retry_at = None;
            self.retry_exhausted = true;
            self.error = Some(match error_type {
                ChannelErrorType::RateLimited => {
                    format!("Realtime service is rate limiting this client: {}", message)
                }
                _ => format!("Realtime service rejected credentials: {}", message),
            });
            warn!(
                target: "consult_sync.channel",
                topic = %self.topic,
                error_type = error_type.as_str(),
                error = %message,
                "Terminal subscribe failure, not retrying"
            );
            return StatusOutcome::Terminal(error_type);
        }

        self.error = Some(message);

        // One failed attempt can surface as several statuses (CHANNEL_ERROR then CLOSED)
        if self.retry_at.is_some() || self.retry_exhausted {
            return StatusOutcome::Ignored;
        }

        if self.remaining_retries == 0 {
            self.retry_exhausted = true;
            warn!(
                target: "consult_sync.channel",
                topic = %self.topic,
                max_retries = self.retry.max_retries,
                "Retry budget exhausted"
            );
            return StatusOutcome::Exhausted;
        }

        self.remaining_retries -= 1;
        let attempt = self.retry.max_retries - self.remaining_retries;
        let delay = self.retry.delay_for(attempt);
        self.retry_at = Some(now + delay);
        debug!(
            target: "consult_sync.channel",
            topic = %self.topic,
            error_type = error_type.as_str(),
            attempt,
            remaining_retries = self.remaining_retries,
            delay_ms = delay.as_millis() as u64,
            "Subscribe failed, retry scheduled"
        );
        StatusOutcome::Retrying { attempt, delay }
    }

    /// Fire a due retry timer. Returns true if a subscribe was issued.
    pub fn poll_timers(&mut self, now: Instant) -> bool {
        if self.disposed {
            return false;
        }
        match self.retry_at {
            Some(at) if now >= at => {
                self.retry_at = None;
                self.transport.unsubscribe(&self.topic);
                self.subscribe_now();
                true
            }
            _ => false,
        }
    }

    /// Manually retry, restoring the full retry budget first.
    pub fn reconnect(&mut self) {
        if self.disposed {
            return;
        }
        info!(target: "consult_sync.channel", topic = %self.topic, "Manual reconnect");
        self.reset_retry_state();
        self.transport.unsubscribe(&self.topic);
        self.subscribe_now();
    }

    /// Switch to another topic. The old channel is unsubscribed first and
    /// listeners are registered afresh for the new one.
    pub fn set_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if self.disposed || topic == self.topic {
            return;
        }
        self.transport.unsubscribe(&self.topic);
        debug!(
            target: "consult_sync.channel",
            from = %self.topic,
            to = %topic,
            "Topic changed"
        );
        self.topic = topic;
        self.listeners = ListenerRegistry::new();
        (self.setup)(&mut self.listeners);
        self.reset_retry_state();
        self.subscribe_now();
    }

    /// Tear down the session. Safe to call more than once; a pending
    /// retry timer will never subscribe afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.retry_at = None;
        self.status = ConnectionStatus::Disconnected;
        self.transport.unsubscribe(&self.topic);
        debug!(target: "consult_sync.channel", topic = %self.topic, "Session disposed");
    }

    /// Route an inbound message to its listeners.
    ///
    /// Messages are accepted in any non-disposed state, including while the
    /// subscribe handshake is still in flight.
    pub fn dispatch(&mut self, message: &ChannelMessage) -> usize {
        if self.disposed {
            return 0;
        }
        let handled = self.listeners.dispatch(message);
        if handled == 0 {
            trace!(
                target: "consult_sync.channel",
                topic = %self.topic,
                event = %message.event,
                "No listener for event"
            );
        }
        handled
    }

    /// Broadcast a message on this channel.
    pub fn send(&mut self, event: &str, payload: Value) -> Result<(), ChannelError> {
        if self.disposed {
            return Err(ChannelError::Disposed);
        }
        if !self.is_connected() {
            return Err(ChannelError::NotConnected(self.topic.clone()));
        }
        let message = ChannelMessage::new(event, payload);
        self.transport.send(&self.topic, &message)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_retrying(&self) -> bool {
        self.retry_at.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_type(&self) -> Option<ChannelErrorType> {
        self.error_type
    }

    pub fn remaining_retries(&self) -> u32 {
        self.remaining_retries
    }

    pub fn retry_exhausted(&self) -> bool {
        self.retry_exhausted
    }

    /// When the pending retry (if any) is due.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Total subscribe calls issued by this session.
    pub fn subscribe_attempts(&self) -> u64 {
        self.subscribe_attempts
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn status_view(&self) -> ChannelStatusView {
        ChannelStatusView {
            topic: self.topic.clone(),
            is_connected: self.is_connected(),
            error: self.error.clone(),
            error_type: self.error_type,
            is_retrying: self.is_retrying(),
            remaining_retries: self.remaining_retries,
            retry_exhausted: self.retry_exhausted,
        }
    }
}

impl<T: RealtimeTransport> Drop for ChannelSession<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: RealtimeTransport> fmt::Debug for ChannelSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("topic", &self.topic)
            .field("status", &self.status)
            .field("error_type", &self.error_type)
            .field("remaining_retries", &self.remaining_retries)
            .field("retry_exhausted", &self.retry_exhausted)
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Calls recorded by a [`MemoryTransport`].
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    pub subscribes: Vec<String>,
    pub unsubscribes: Vec<String>,
    pub sent: Vec<(String, ChannelMessage)>,
    pub fail_sends: bool,
}

/// In-process transport that records every call.
///
/// Clones share one log, so a test or host can keep a handle while the
/// session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    log: Rc<RefCell<TransportLog>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe calls issued for a topic.
    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.log
            .borrow()
            .subscribes
            .iter()
            .filter(|t| t.as_str() == topic)
            .count()
    }

    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        self.log
            .borrow()
            .unsubscribes
            .iter()
            .filter(|t| t.as_str() == topic)
            .count()
    }

    /// Messages sent on a topic, oldest first.
    pub fn sent_on(&self, topic: &str) -> Vec<ChannelMessage> {
        self.log
            .borrow()
            .sent
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Drain all sent messages.
    pub fn take_sent(&self) -> Vec<(String, ChannelMessage)> {
        std::mem::take(&mut self.log.borrow_mut().sent)
    }

    /// Make subsequent sends fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.log.borrow_mut().fail_sends = fail;
    }

    pub fn snapshot(&self) -> TransportLog {
        self.log.borrow().clone()
    }
}

impl RealtimeTransport for MemoryTransport {
    fn subscribe(&mut self, topic: &str) {
        self.log.borrow_mut().subscribes.push(topic.to_string());
    }

    fn send(&mut self, topic: &str, message: &ChannelMessage) -> Result<(), ChannelError> {
        let mut log = self.log.borrow_mut();
        if log.fail_sends {
            return Err(ChannelError::Transport("send rejected".into()));
        }
        log.sent.push((topic.to_string(), message.clone()));
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) {
        self.log.borrow_mut().unsubscribes.push(topic.to_string());
    }
}
