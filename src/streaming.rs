//! Buffers streamed model output and flushes it on a bounded cadence.
//! Single-agent, cooperative: one `StreamingPublisher` serves one stream at
//! a time and is not meant to be shared across concurrent turns.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;

/// Minimum gap enforced between two publishes once a first publish has
/// happened.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Upper bound on how long fed output can sit unpublished.
pub const MAX_LATENCY: Duration = Duration::from_millis(1500);

/// One chunk of published output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamUpdate {
    Reasoning(String),
    Text(String),
}

/// Buffers `feed`s and emits `StreamUpdate`s over `sink` on the following
/// schedule: immediate if the last publish was long enough ago, otherwise
/// scheduled for `min(MIN_INTERVAL - elapsed, MAX_LATENCY)` out (or
/// `MIN_INTERVAL` if nothing has published yet).
pub struct StreamingPublisher {
    sink: mpsc::UnboundedSender<StreamUpdate>,
    regular: String,
    reasoning: String,
    last_publish: Option<Instant>,
    flush_generation: u64,
    pending_delay: Option<Duration>,
}

impl StreamingPublisher {
    pub fn new(sink: mpsc::UnboundedSender<StreamUpdate>) -> Self {
        StreamingPublisher {
            sink,
            regular: String::new(),
            reasoning: String::new(),
            last_publish: None,
            flush_generation: 0,
            pending_delay: None,
        }
    }

    /// Appends `delta` to the appropriate buffer and either flushes
    /// immediately or arms a delayed flush, cancelling any previously
    /// armed one.
    pub async fn feed(&mut self, delta: &str, is_reasoning: bool) {
        if is_reasoning {
            self.reasoning.push_str(delta);
        } else {
            self.regular.push_str(delta);
        }

        // Invalidate any flush scheduled by a prior feed; only the latest
        // scheduled flush actually fires (checked via flush_generation).
        self.flush_generation += 1;

        let now = Instant::now();
        let due = match self.last_publish {
            Some(last) if now.saturating_duration_since(last) >= MIN_INTERVAL => None,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                Some(MIN_INTERVAL.saturating_sub(elapsed).min(MAX_LATENCY))
            }
            None => Some(MIN_INTERVAL),
        };

        match due {
            None => self.flush(),
            Some(delay) => self.arm_delayed_flush(delay),
        }
    }

    fn arm_delayed_flush(&mut self, delay: Duration) {
        // The actual timer lives with the caller (ExecutionEngine's turn
        // loop), which polls `due_in` / calls `flush` on schedule. This
        // method just records that a flush is armed so `feed` can reason
        // about whether a new one is needed; callers drive the clock via
        // `tokio::time::sleep` against the returned delay.
        self.pending_delay = Some(delay);
    }

    /// Emits one update per non-empty buffer (reasoning first, then
    /// regular), clears both, and records this as the last publish.
    pub fn flush(&mut self) {
        if !self.reasoning.is_empty() {
            let _ = self.sink.send(StreamUpdate::Reasoning(std::mem::take(&mut self.reasoning)));
        }
        if !self.regular.is_empty() {
            let _ = self.sink.send(StreamUpdate::Text(std::mem::take(&mut self.regular)));
        }
        self.last_publish = Some(Instant::now());
        self.pending_delay = None;
        self.flush_generation += 1;
    }

    /// Flushes immediately if either buffer is non-empty, regardless of
    /// timing; otherwise a no-op. Used on stream completion/cancellation.
    pub fn force_flush(&mut self) {
        if !self.reasoning.is_empty() || !self.regular.is_empty() {
            self.flush();
        }
    }

    /// The delay a caller should sleep before calling `flush` again, if a
    /// flush is currently armed.
    pub fn due_in(&self) -> Option<Duration> {
        self.pending_delay
    }

    /// Drives the armed flush to completion by sleeping out its delay,
    /// then flushing — unless a later `feed` superseded it in the
    /// meantime (tracked by `flush_generation`).
    pub async fn wait_for_scheduled_flush(&mut self) {
        let Some(delay) = self.pending_delay else { return };
        let generation = self.flush_generation;
        sleep(delay).await;
        if self.flush_generation == generation {
            self.flush();
        }
    }
}
