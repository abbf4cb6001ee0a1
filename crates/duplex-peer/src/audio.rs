//! Paced Opus silence.
//!
//! Microphone capture is platform territory; the bridge only needs a source
//! that keeps the outbound track alive. [`SilenceSource`] emits one
//! 20 ms Opus silence frame per tick until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use duplex_core::{BridgeError, EventId};
use tokio::sync::{Mutex, Notify};
use tokio::time::{Interval, MissedTickBehavior};

use crate::transport::{AudioFrame, AudioSource, LocalTrack};

/// Opus TOC + payload for a silent 20 ms frame.
const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Frame duration matching [`OPUS_SILENCE`].
pub const SILENCE_FRAME: Duration = Duration::from_millis(20);

/// Audio source producing silence tracks.
#[derive(Clone, Debug, Default)]
pub struct SilenceSource;

#[async_trait]
impl AudioSource for SilenceSource {
    async fn acquire(&self) -> Result<Arc<dyn LocalTrack>, BridgeError> {
        Ok(Arc::new(SilenceTrack::new()))
    }
}

/// A track that yields [`OPUS_SILENCE`] every [`SILENCE_FRAME`].
pub struct SilenceTrack {
    id: String,
    stopped: AtomicBool,
    stop_signal: Notify,
    ticker: Mutex<Interval>,
}

impl SilenceTrack {
    /// Create a running silence track. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let mut ticker = tokio::time::interval(SILENCE_FRAME);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            id: format!("silence-{}", EventId::new()),
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
            ticker: Mutex::new(ticker),
        }
    }
}

impl Default for SilenceTrack {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalTrack for SilenceTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn next_frame(&self) -> Option<AudioFrame> {
        if self.is_stopped() {
            return None;
        }
        let mut ticker = self.ticker.lock().await;
        tokio::select! {
            _ = ticker.tick() => {}
            () = self.stop_signal.notified() => return None,
        }
        if self.is_stopped() {
            return None;
        }
        Some(AudioFrame {
            data: Bytes::from_static(&OPUS_SILENCE),
            duration: SILENCE_FRAME,
        })
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop_signal.notify_waiters();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn yields_paced_silence_frames() {
        let track = SilenceSource.acquire().await.unwrap();
        let frame = track.next_frame().await.unwrap();
        assert_eq!(frame.data.as_ref(), &OPUS_SILENCE);
        assert_eq!(frame.duration, SILENCE_FRAME);

        let before = tokio::time::Instant::now();
        let _ = track.next_frame().await.unwrap();
        assert!(before.elapsed() >= SILENCE_FRAME);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_track_ends_stream() {
        let track = SilenceSource.acquire().await.unwrap();
        track.stop();
        assert!(track.is_stopped());
        assert!(track.next_frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_wakes_pending_reader() {
        let track = SilenceSource.acquire().await.unwrap();
        let _ = track.next_frame().await;

        let reader = Arc::clone(&track);
        let pending = tokio::spawn(async move { reader.next_frame().await });
        tokio::task::yield_now().await;
        track.stop();

        assert!(pending.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn track_ids_are_unique() {
        let a = SilenceSource.acquire().await.unwrap();
        let b = SilenceSource.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());
    }
}
