//! Host-side conversation loop
//!
//! Bridges pipeline events to the remote agent: a transcript is sent to the
//! agent while the waiting chime loops, and the reply is spoken through the
//! pipeline. Replies that arrive after the user has moved on (barge-in, a
//! new wake word, a newer transcript) are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentClient;
use crate::voice::{EventSink, VoicePipeline, WaitingChime};

/// Pipeline notification forwarded to the async side
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    WakeWord { word: String, confidence: f32 },
    VoiceActivity(bool),
    Transcription(String),
    SpeechInterrupted,
    Error(String),
}

/// [`EventSink`] that logs and forwards every event over a channel
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<VoiceEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver for [`Assistant::run`]
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: VoiceEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver closed");
        }
    }
}

impl EventSink for ChannelEventSink {
    fn on_wake_word(&self, word: &str, confidence: f32) {
        self.forward(VoiceEvent::WakeWord {
            word: word.to_string(),
            confidence,
        });
    }

    fn on_voice_activity(&self, active: bool) {
        self.forward(VoiceEvent::VoiceActivity(active));
    }

    fn on_transcription(&self, text: &str) {
        self.forward(VoiceEvent::Transcription(text.to_string()));
    }

    fn on_speech_interrupted(&self) {
        self.forward(VoiceEvent::SpeechInterrupted);
    }

    fn on_error(&self, message: &str) {
        tracing::warn!(error = message, "voice turn failed");
        self.forward(VoiceEvent::Error(message.to_string()));
    }
}

/// Drives agent round-trips for one pipeline
pub struct Assistant {
    pipeline: Arc<VoicePipeline>,
    agent: Arc<dyn AgentClient>,
    chime: Option<Arc<WaitingChime>>,
    /// Bumped whenever pending replies become stale
    epoch: Arc<AtomicU64>,
}

impl Assistant {
    #[must_use]
    pub fn new(
        pipeline: Arc<VoicePipeline>,
        agent: Arc<dyn AgentClient>,
        chime: Option<Arc<WaitingChime>>,
    ) -> Self {
        Self {
            pipeline,
            agent,
            chime,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current reply epoch
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Process events until the channel closes or `shutdown` fires
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<VoiceEvent>, shutdown: CancellationToken) {
        let mut turns = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.handle(event, &mut turns).await;
                }
                Some(joined) = turns.join_next(), if !turns.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "agent turn task failed");
                    }
                }
            }
        }

        self.epoch.fetch_add(1, Ordering::SeqCst);
        turns.abort_all();
        self.stop_chime().await;
    }

    async fn handle(&self, event: VoiceEvent, turns: &mut tokio::task::JoinSet<()>) {
        match event {
            VoiceEvent::WakeWord { .. } | VoiceEvent::SpeechInterrupted => {
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(epoch, "pending replies cancelled");
                self.stop_chime().await;
            }
            VoiceEvent::Transcription(text) => {
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                self.start_chime();
                turns.spawn(agent_turn(
                    text,
                    epoch,
                    Arc::clone(&self.epoch),
                    Arc::clone(&self.agent),
                    Arc::clone(&self.pipeline),
                    self.chime.clone(),
                ));
            }
            VoiceEvent::VoiceActivity(_) | VoiceEvent::Error(_) => {}
        }
    }

    fn start_chime(&self) {
        if let Some(chime) = &self.chime
            && let Err(e) = chime.start()
        {
            tracing::warn!(error = %e, "failed to start waiting chime");
        }
    }

    async fn stop_chime(&self) {
        if let Some(chime) = self.chime.clone() {
            let _ = tokio::task::spawn_blocking(move || chime.stop()).await;
        }
    }
}

/// One transcript -> reply round-trip
async fn agent_turn(
    text: String,
    epoch: u64,
    current: Arc<AtomicU64>,
    agent: Arc<dyn AgentClient>,
    pipeline: Arc<VoicePipeline>,
    chime: Option<Arc<WaitingChime>>,
) {
    let reply = agent.ask(&text).await;

    if current.load(Ordering::SeqCst) != epoch {
        tracing::debug!(epoch, "dropping stale agent reply");
        return;
    }

    let outcome = tokio::task::spawn_blocking(move || {
        if let Some(chime) = chime {
            chime.stop();
        }
        match reply {
            Ok(reply) => {
                if current.load(Ordering::SeqCst) == epoch {
                    pipeline.speak_text_async(&reply);
                }
            }
            Err(e) => tracing::warn!(error = %e, "agent request failed"),
        }
    })
    .await;

    if let Err(e) = outcome {
        tracing::error!(error = %e, "reply task failed");
    }
}
