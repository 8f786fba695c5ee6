//! Intent lifecycle observation.
//!
//! Merges the server-sent-event stream endpoint (push) and the paged events
//! endpoint (pull) into one ordered sequence behind a single cursor. The
//! sequence ends after the first terminal event; an overall deadline is
//! checked once per cycle.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::stream::{self, BoxStream, Stream};
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, trace};

use crate::client::{HttpClient, RequestDescriptor};
use crate::error::{GatewayError, Result};
use crate::types::IntentEvent;

/// SSE event names carrying intent lifecycle events start with this prefix.
pub const INTENT_EVENT_PREFIX: &str = "intent.";

const DEFAULT_WAIT_SECONDS: u64 = 15;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Added to the push wait so the HTTP timeout never cuts a healthy long poll.
const STREAM_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Parameters of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Only events after this sequence number are wanted.
    pub since: u64,
    /// Seconds the push endpoint may hold a cycle open. At least 1.
    pub wait_seconds: u64,
    /// Delay between empty pull pages.
    pub poll_interval_ms: u64,
    /// Overall deadline. Must be positive when set.
    pub timeout_ms: Option<u64>,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            since: 0,
            wait_seconds: DEFAULT_WAIT_SECONDS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: None,
        }
    }
}

impl ObserveOptions {
    /// Resume after the given sequence number.
    pub fn since(mut self, since: u64) -> Self {
        self.since = since;
        self
    }

    /// Set the per-cycle push wait.
    pub fn wait_seconds(mut self, wait_seconds: u64) -> Self {
        self.wait_seconds = wait_seconds;
        self
    }

    /// Set the delay between empty pull pages.
    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Give up after this many milliseconds.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.wait_seconds < 1 {
            return Err(GatewayError::invalid_argument("wait_seconds must be at least 1"));
        }
        if self.timeout_ms == Some(0) {
            return Err(GatewayError::invalid_argument("timeout_ms must be positive"));
        }
        Ok(())
    }
}

type SseStream = BoxStream<'static, std::result::Result<Event, EventStreamError<reqwest::Error>>>;

enum Phase {
    /// Start a new cycle on the next pull.
    Idle,
    /// Reading a push response.
    Streaming(SseStream),
    /// Draining a pull page.
    Buffered(VecDeque<IntentEvent>),
    /// Terminal event delivered, or failed.
    Done,
}

/// Lazy, resumable sequence of lifecycle events for one intent.
///
/// Pull events with [`IntentObserver::next`], or adapt with
/// [`IntentObserver::into_stream`]. Dropping the observer cancels it.
pub struct IntentObserver {
    client: HttpClient,
    intent_id: String,
    options: ObserveOptions,
    cursor: u64,
    last_seq: Option<u64>,
    deadline: Option<Instant>,
    phase: Phase,
}

impl IntentObserver {
    pub(crate) fn new(
        client: HttpClient,
        intent_id: impl Into<String>,
        options: ObserveOptions,
    ) -> Result<Self> {
        let intent_id = intent_id.into();
        if intent_id.trim().is_empty() {
            return Err(GatewayError::invalid_argument("intent_id is required"));
        }
        options.validate()?;

        let deadline = options
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let cursor = options.since;
        let last_seq = (cursor > 0).then_some(cursor);

        Ok(Self {
            client,
            intent_id,
            options,
            cursor,
            last_seq,
            deadline,
            phase: Phase::Idle,
        })
    }

    /// The intent being observed.
    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    /// Highest sequence number observed so far (or the starting cursor).
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Next event, `None` once the terminal event has been delivered or an
    /// error has been returned.
    pub async fn next(&mut self) -> Option<Result<IntentEvent>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Idle => {
                    if let Err(error) = self.start_cycle().await {
                        self.phase = Phase::Done;
                        return Some(Err(error));
                    }
                }
                Phase::Streaming(mut events) => match events.next().await {
                    Some(Ok(message)) => {
                        self.phase = Phase::Streaming(events);
                        if let Some(event) = self.parse_sse(message) {
                            if self.is_fresh(&event) {
                                return Some(Ok(self.emit(event)));
                            }
                        }
                    }
                    Some(Err(error)) if ends_cycle(&error) => {
                        debug!(
                            intent_id = %self.intent_id,
                            cursor = self.cursor,
                            "event stream timed out, reconnecting"
                        );
                        self.phase = Phase::Idle;
                    }
                    Some(Err(error)) => return Some(Err(stream_error(error))),
                    None => self.phase = Phase::Idle,
                },
                Phase::Buffered(mut page) => match page.pop_front() {
                    Some(event) => {
                        self.phase = Phase::Buffered(page);
                        if self.is_fresh(&event) {
                            return Some(Ok(self.emit(event)));
                        }
                    }
                    None => self.phase = Phase::Idle,
                },
            }
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<IntentEvent>> + Send {
        stream::unfold(self, |mut observer| async move {
            observer.next().await.map(|item| (item, observer))
        })
    }

    /// Drain the sequence and return its terminal event.
    pub async fn wait_for(mut self) -> Result<IntentEvent> {
        while let Some(event) = self.next().await {
            let event = event?;
            if event.is_terminal() {
                return Ok(event);
            }
        }
        Err(GatewayError::Protocol(format!(
            "event sequence for intent {} ended without a terminal event",
            self.intent_id
        )))
    }

    /// Leaves the phase `Idle` when a pull page had nothing new.
    async fn start_cycle(&mut self) -> Result<()> {
        self.phase = Phase::Idle;
        let wait_seconds = self.cycle_wait()?;

        let opened =
            Self::open_stream(&self.client, &self.intent_id, self.cursor, wait_seconds).await;
        match opened {
            Ok(events) => {
                self.phase = Phase::Streaming(events);
                Ok(())
            }
            Err(error) if is_push_unavailable(&error) => {
                debug!(
                    intent_id = %self.intent_id,
                    status = error.status().unwrap_or_default(),
                    "event stream unavailable, polling instead"
                );
                self.poll().await
            }
            Err(error) => Err(error),
        }
    }

    /// Push wait for this cycle, clamped to the deadline.
    fn cycle_wait(&self) -> Result<u64> {
        let Some(deadline) = self.deadline else {
            return Ok(self.options.wait_seconds);
        };
        let now = Instant::now();
        if now >= deadline {
            return Err(GatewayError::Timeout {
                intent_id: self.intent_id.clone(),
                timeout_ms: self.options.timeout_ms.unwrap_or_default(),
            });
        }
        let remaining = deadline.duration_since(now).as_secs();
        Ok(self.options.wait_seconds.min(remaining).max(1))
    }

    async fn open_stream(
        client: &HttpClient,
        intent_id: &str,
        cursor: u64,
        wait_seconds: u64,
    ) -> Result<SseStream> {
        let request = RequestDescriptor::new(
            Method::GET,
            format!(
                "/v1/intents/{}/events/stream",
                urlencoding::encode(intent_id)
            ),
        )
        .query(vec![
            ("since".to_string(), cursor.to_string()),
            ("wait_seconds".to_string(), wait_seconds.to_string()),
        ])
        .event_stream(Duration::from_secs(wait_seconds) + STREAM_TIMEOUT_SLACK);

        let response = client.send(&request).await?;
        Ok(response.bytes_stream().eventsource().boxed())
    }

    async fn poll(&mut self) -> Result<()> {
        let query = if self.cursor > 0 {
            vec![("since".to_string(), self.cursor.to_string())]
        } else {
            Vec::new()
        };
        let request = RequestDescriptor::new(
            Method::GET,
            format!("/v1/intents/{}/events", urlencoding::encode(&self.intent_id)),
        )
        .query(query)
        .retry_by_method();

        let body = self.client.execute(request).await?;
        let page: VecDeque<IntentEvent> = match body.get("events").and_then(Value::as_array) {
            Some(events) => events
                .iter()
                .cloned()
                .filter_map(IntentEvent::from_value)
                .filter(|event| self.is_fresh(event))
                .collect(),
            None => {
                return Err(GatewayError::contract_violation(
                    200,
                    "intent events response is missing the events array",
                    Some(body),
                ))
            }
        };

        if page.is_empty() {
            let delay = self.poll_delay();
            self.client.sleeper().sleep(delay).await;
        } else {
            self.phase = Phase::Buffered(page);
        }
        Ok(())
    }

    fn poll_delay(&self) -> Duration {
        let interval = Duration::from_millis(self.options.poll_interval_ms);
        match self.deadline {
            Some(deadline) => interval.min(deadline.saturating_duration_since(Instant::now())),
            None => interval,
        }
    }

    fn parse_sse(&self, message: Event) -> Option<IntentEvent> {
        if !message.event.starts_with(INTENT_EVENT_PREFIX) {
            trace!(event = %message.event, "skipping non-intent stream event");
            return None;
        }
        let parsed = serde_json::from_str::<Value>(&message.data)
            .ok()
            .and_then(IntentEvent::from_value);
        if parsed.is_none() {
            trace!(event = %message.event, "skipping stream event without an object payload");
        }
        parsed
    }

    /// Events at or below the highest delivered sequence number are replays.
    fn is_fresh(&self, event: &IntentEvent) -> bool {
        match (event.seq(), self.last_seq) {
            (Some(seq), Some(last)) => seq > last,
            _ => true,
        }
    }

    fn emit(&mut self, event: IntentEvent) -> IntentEvent {
        if let Some(seq) = event.seq() {
            self.cursor = self.cursor.max(seq);
            self.last_seq = Some(self.last_seq.map_or(seq, |last| last.max(seq)));
        }
        if event.is_terminal() {
            self.phase = Phase::Done;
        }
        event
    }
}

/// The push endpoint is not deployed on this gateway.
fn is_push_unavailable(error: &GatewayError) -> bool {
    matches!(error.status(), Some(404 | 405 | 501))
}

/// A push response that outlives its request timeout ends the cycle, not the
/// observation.
fn ends_cycle(error: &EventStreamError<reqwest::Error>) -> bool {
    matches!(error, EventStreamError::Transport(error) if error.is_timeout())
}

fn stream_error(error: EventStreamError<reqwest::Error>) -> GatewayError {
    match error {
        EventStreamError::Transport(error) => GatewayError::Transport(error),
        other => GatewayError::contract_violation(
            200,
            format!("malformed intent event stream: {other}"),
            None,
        ),
    }
}
