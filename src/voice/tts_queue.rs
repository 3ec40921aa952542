//! Parallel synthesis/playback queue
//!
//! The producer pushes one [`AudioChunk`] per synthesized sentence while a
//! single consumer thread plays chunks in push order through an
//! [`AudioSink`]. Sentence N+1 can therefore synthesize while sentence N
//! plays, and the whole queue can be cancelled from any thread.
//!
//! Lifecycle (one mutex guards every transition):
//!
//! ```text
//! NotStarted --push--> Running --finish--> Draining --drained--> Stopped
//!      |                  |                    |
//!      +---finish/cancel--+-------cancel-------+----------------> Stopped
//! ```

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::{AudioChunk, AudioSink};

/// Default upper bound for `cancel()` to wait on an in-flight sink call
const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_millis(500);

/// Consumer lifecycle of a [`TtsQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing pushed yet, no consumer thread
    NotStarted,
    /// Consumer running, more chunks may arrive
    Running,
    /// `finish()` called, consumer playing what is left
    Draining,
    /// Consumer exited (drained or cancelled); terminal
    Stopped,
}

struct Shared {
    chunks: VecDeque<AudioChunk>,
    lifecycle: QueueState,
    finished: bool,
    cancelled: bool,
    /// A sink call has been committed to and has not returned yet
    in_flight: bool,
    played: usize,
}

struct Inner {
    sink: Arc<dyn AudioSink>,
    cancel: CancellationToken,
    shared: Mutex<Shared>,
    cond: Condvar,
}

/// Ordered, cancellable producer/consumer channel between TTS and playback
pub struct TtsQueue {
    inner: Arc<Inner>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    cancel_timeout: Duration,
}

impl TtsQueue {
    /// Create a queue that plays through `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self::with_cancel_timeout(sink, DEFAULT_CANCEL_TIMEOUT)
    }

    /// Create a queue whose `cancel()` waits at most `cancel_timeout` for
    /// an in-flight sink call to return
    #[must_use]
    pub fn with_cancel_timeout(sink: Arc<dyn AudioSink>, cancel_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                cancel: CancellationToken::new(),
                shared: Mutex::new(Shared {
                    chunks: VecDeque::new(),
                    lifecycle: QueueState::NotStarted,
                    finished: false,
                    cancelled: false,
                    in_flight: false,
                    played: 0,
                }),
                cond: Condvar::new(),
            }),
            consumer: Mutex::new(None),
            cancel_timeout,
        }
    }

    /// Enqueue a chunk for playback
    ///
    /// Never waits for playback. The first push starts the consumer thread.
    /// Silently dropped after `finish()` or `cancel()`.
    pub fn push(&self, chunk: AudioChunk) {
        let mut shared = self.inner.shared.lock();
        if shared.finished || shared.cancelled {
            tracing::trace!(
                samples = chunk.len(),
                cancelled = shared.cancelled,
                "dropping chunk pushed after finish"
            );
            return;
        }

        shared.chunks.push_back(chunk);
        let start = shared.lifecycle == QueueState::NotStarted;
        if start {
            shared.lifecycle = QueueState::Running;
        }
        drop(shared);

        if start {
            self.spawn_consumer();
        }
        self.inner.cond.notify_all();
    }

    /// Mark that no more chunks will be pushed
    ///
    /// Queued chunks still play; the consumer exits once they are drained.
    pub fn finish(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.finished {
            return;
        }
        shared.finished = true;
        shared.lifecycle = match shared.lifecycle {
            QueueState::NotStarted => QueueState::Stopped,
            QueueState::Running => QueueState::Draining,
            other => other,
        };
        drop(shared);
        self.inner.cond.notify_all();
    }

    /// Stop playback now and discard everything queued
    ///
    /// Fires the cancel token seen by the sink, then waits (bounded by the
    /// cancel timeout) until no sink call is in flight. Once this returns,
    /// no further sink call will start.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();

        let mut shared = self.inner.shared.lock();
        if !shared.cancelled {
            shared.cancelled = true;
            shared.finished = true;
            let dropped = shared.chunks.len();
            shared.chunks.clear();
            if shared.lifecycle == QueueState::NotStarted {
                shared.lifecycle = QueueState::Stopped;
            }
            tracing::debug!(
                dropped,
                played = shared.played,
                in_flight = shared.in_flight,
                "tts queue cancelled"
            );
            if shared.in_flight {
                MutexGuard::unlocked(&mut shared, || self.inner.sink.stop());
            }
        }
        self.inner.cond.notify_all();

        let deadline = Instant::now() + self.cancel_timeout;
        while shared.in_flight || is_running(shared.lifecycle) {
            if self.inner.cond.wait_until(&mut shared, deadline).timed_out() {
                tracing::warn!(
                    timeout_ms = self.cancel_timeout.as_millis(),
                    "audio sink ignored cancellation"
                );
                break;
            }
        }
    }

    /// True while the consumer thread exists and has not exited
    #[must_use]
    pub fn is_active(&self) -> bool {
        is_running(self.inner.shared.lock().lifecycle)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> QueueState {
        self.inner.shared.lock().lifecycle
    }

    /// True once `cancel()` has been called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.shared.lock().cancelled
    }

    /// Chunks waiting to be played
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.shared.lock().chunks.len()
    }

    /// Chunks handed to the sink so far
    #[must_use]
    pub fn played(&self) -> usize {
        self.inner.shared.lock().played
    }

    /// Token passed to every sink call; fires on `cancel()`
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Block until the consumer has exited
    ///
    /// Returns `false` if `timeout` elapsed first. A queue that was never
    /// started is idle.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let mut shared = self.inner.shared.lock();
        match timeout {
            None => {
                while is_running(shared.lifecycle) {
                    self.inner.cond.wait(&mut shared);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while is_running(shared.lifecycle) {
                    if self.inner.cond.wait_until(&mut shared, deadline).timed_out() {
                        return !is_running(shared.lifecycle);
                    }
                }
                true
            }
        }
    }

    fn spawn_consumer(&self) {
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("tts-playback".to_string())
            .spawn(move || inner.consume());

        match spawned {
            Ok(handle) => *self.consumer.lock() = Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn tts playback thread");
                let mut shared = self.inner.shared.lock();
                shared.chunks.clear();
                shared.lifecycle = QueueState::Stopped;
                drop(shared);
                self.inner.cond.notify_all();
            }
        }
    }
}

impl Drop for TtsQueue {
    fn drop(&mut self) {
        self.cancel();

        if let Some(handle) = self.consumer.get_mut().take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("tts playback thread panicked");
            }
        }
    }
}

impl Inner {
    fn consume(&self) {
        let mut shared = self.shared.lock();
        loop {
            if shared.cancelled {
                break;
            }

            if let Some(chunk) = shared.chunks.pop_front() {
                shared.in_flight = true;
                MutexGuard::unlocked(&mut shared, || self.play(&chunk));
                shared.in_flight = false;
                shared.played += 1;
                self.cond.notify_all();
                continue;
            }

            if shared.finished {
                break;
            }
            self.cond.wait(&mut shared);
        }

        shared.chunks.clear();
        shared.lifecycle = QueueState::Stopped;
        tracing::trace!(played = shared.played, "tts playback thread exiting");
        drop(shared);
        self.cond.notify_all();
    }

    fn play(&self, chunk: &AudioChunk) {
        if chunk.is_empty() {
            return;
        }

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.sink
                .play(&chunk.samples, chunk.sample_rate, &self.cancel);
        }));
        if result.is_err() {
            tracing::error!(samples = chunk.len(), "audio sink panicked during playback");
        }
    }
}

const fn is_running(state: QueueState) -> bool {
    matches!(state, QueueState::Running | QueueState::Draining)
}
