//! The paced output queue (§4.1): smooths bursty TTS audio onto the wire
//! at real-time cadence, with pause/resume/flush/drain semantics that the
//! voice session relies on for barge-in.
//!
//! The design note in §9 describes the teacher's flush as "atomically
//! replacing the stop signal" so the worker loop can drain without
//! terminating. Here that is realized with a `biased` `select!` over a
//! small control channel that always preempts frame delivery: a `Flush`
//! command drains every frame currently sitting in the data channel and
//! replies with the count, then the same loop iteration goes straight back
//! to servicing `Enqueue` — the worker never stops, never gets recreated.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use voice_agent_core::{AudioChunk, AudioFormat};

/// One pre-encoded audio frame destined for the peer, paired with the
/// framing the transport derived from its codec (§6.1).
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub chunk: AudioChunk,
    pub samples: u32,
    pub duration: Duration,
}

impl OutputFrame {
    pub fn new(chunk: AudioChunk, samples: u32, duration: Duration) -> Self {
        Self {
            chunk,
            samples,
            duration,
        }
    }
}

/// What the queue's consumer writes a drained frame to. The transport
/// crate implements this over an RTP track; tests use an in-memory
/// recorder.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write_frame(&self, frame: &OutputFrame);
}

/// Invoked with the drop count whenever `Enqueue` finds the queue full.
/// Never blocks, never errors — matches the Capacity error class in §7,
/// which is always surfaced via callback rather than a `Result`.
pub type BackpressureFn = Arc<dyn Fn(u64) + Send + Sync>;

enum Control {
    Flush(oneshot::Sender<u64>),
    Stop,
}

/// Bounded, paced, pause/flush/drain-capable audio output queue.
///
/// Cloning a handle is cheap; all clones share the same worker task and
/// counters.
#[derive(Clone)]
pub struct PacedOutputQueue {
    inner: Arc<Inner>,
}

struct Inner {
    frame_tx: mpsc::Sender<OutputFrame>,
    control_tx: mpsc::Sender<Control>,
    paused: AtomicBool,
    pending: AtomicUsize,
    drained: Notify,
    capacity: usize,
    backpressure: BackpressureFn,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PacedOutputQueue {
    /// Spawns the consumer task and returns a handle. `capacity` matches
    /// the spec's default of 4096 when callers pass that value through
    /// `voice_agent_config::QueueConfig`.
    pub fn spawn(capacity: usize, sink: Arc<dyn FrameSink>, backpressure: BackpressureFn) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (control_tx, control_rx) = mpsc::channel(16);

        let inner = Arc::new(Inner {
            frame_tx,
            control_tx,
            paused: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            capacity,
            backpressure,
            worker: Mutex::new(None),
        });

        let worker_inner = inner.clone();
        let handle = tokio::spawn(run(worker_inner, frame_rx, control_rx, sink));
        *inner.worker.lock() = Some(handle);

        Self { inner }
    }

    /// Places one pre-encoded frame on the queue. Never blocks: a full
    /// queue drops the frame and invokes the queue's backpressure callback
    /// with a drop count of 1, matching §8's invariant that queue length
    /// never exceeds capacity and the callback fires exactly once per
    /// dropped enqueue.
    pub fn enqueue(&self, frame: OutputFrame) {
        match self.inner.frame_tx.try_send(frame) {
            Ok(()) => {
                self.inner.pending.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(capacity = self.inner.capacity, "output queue full, dropping frame");
                (self.inner.backpressure)(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("output queue closed, dropping frame");
            }
        }
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Relaxed)
    }

    /// Drains every frame currently queued and returns the count. Safe to
    /// call concurrently with `enqueue`; frames admitted after the drain
    /// snapshot is taken are serviced normally by the still-running
    /// worker.
    pub async fn flush(&self) -> u64 {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.inner.control_tx.send(Control::Flush(reply_tx)).await.is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }

    /// Blocks until the pending-frame counter reaches zero.
    pub async fn wait_for_drain(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Idempotent: stops the worker and waits for it to exit. Subsequent
    /// calls are no-ops.
    pub async fn stop(&self) {
        let _ = self.inner.control_tx.send(Control::Stop).await;
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn notify_if_drained(pending: &AtomicUsize, notify: &Notify) {
    if pending.load(Ordering::SeqCst) == 0 {
        notify.notify_waiters();
    }
}

async fn run(
    inner: Arc<Inner>,
    mut frame_rx: mpsc::Receiver<OutputFrame>,
    mut control_rx: mpsc::Receiver<Control>,
    sink: Arc<dyn FrameSink>,
) {
    loop {
        tokio::select! {
            biased;
            ctrl = control_rx.recv() => {
                match ctrl {
                    Some(Control::Flush(reply)) => {
                        let mut drained = 0u64;
                        while let Ok(_frame) = frame_rx.try_recv() {
                            drained += 1;
                            inner.pending.fetch_sub(1, Ordering::SeqCst);
                        }
                        notify_if_drained(&inner.pending, &inner.drained);
                        let _ = reply.send(drained);
                    }
                    Some(Control::Stop) | None => break,
                }
            }
            maybe_frame = frame_rx.recv() => {
                let Some(frame) = maybe_frame else { break };
                if inner.paused.load(Ordering::Relaxed) {
                    inner.pending.fetch_sub(1, Ordering::SeqCst);
                    notify_if_drained(&inner.pending, &inner.drained);
                    continue;
                }
                let started = Instant::now();
                sink.write_frame(&frame).await;
                metrics::counter!("voice_agent_output_frames_written_total").increment(1);
                inner.pending.fetch_sub(1, Ordering::SeqCst);
                notify_if_drained(&inner.pending, &inner.drained);

                let elapsed = started.elapsed();
                if frame.duration > elapsed {
                    tokio::time::sleep(frame.duration - elapsed).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: AsyncMutex<Vec<OutputFrame>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn write_frame(&self, frame: &OutputFrame) {
            self.frames.lock().await.push(frame.clone());
        }
    }

    fn tiny_frame() -> OutputFrame {
        OutputFrame::new(AudioChunk::opus(vec![0xFCu8]), 960, Duration::from_millis(0))
    }

    fn noop_backpressure() -> BackpressureFn {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn flush_on_empty_queue_returns_zero() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PacedOutputQueue::spawn(4, sink, noop_backpressure());
        assert_eq!(queue.flush().await, 0);
        queue.stop().await;
    }

    #[tokio::test]
    async fn enqueue_past_capacity_invokes_backpressure_with_drop_count_one() {
        let sink = Arc::new(RecordingSink::default());
        let drops = Arc::new(AtomicU64::new(0));
        let drops_clone = drops.clone();
        let backpressure: BackpressureFn = Arc::new(move |n| {
            drops_clone.fetch_add(n, Ordering::SeqCst);
        });
        // Pause immediately so the consumer doesn't drain while we fill it.
        let queue = PacedOutputQueue::spawn(1, sink, backpressure);
        queue.pause();

        // Drive enough enqueues that at least one observes a full channel.
        for _ in 0..8 {
            queue.enqueue(tiny_frame());
        }

        assert!(drops.load(Ordering::SeqCst) >= 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn pause_drops_frames_without_writing_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PacedOutputQueue::spawn(8, sink.clone(), noop_backpressure());
        queue.pause();
        queue.enqueue(tiny_frame());
        queue.enqueue(tiny_frame());
        queue.wait_for_drain().await;
        assert!(sink.frames.lock().await.is_empty());
        queue.stop().await;
    }

    #[tokio::test]
    async fn resume_after_pause_writes_subsequent_frames() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PacedOutputQueue::spawn(8, sink.clone(), noop_backpressure());
        queue.pause();
        queue.enqueue(tiny_frame());
        queue.wait_for_drain().await;
        queue.resume();
        queue.enqueue(tiny_frame());
        queue.wait_for_drain().await;
        assert_eq!(sink.frames.lock().await.len(), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn flush_drains_queued_frames_and_worker_keeps_servicing_enqueues() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PacedOutputQueue::spawn(8, sink.clone(), noop_backpressure());
        queue.pause();
        for _ in 0..3 {
            queue.enqueue(tiny_frame());
        }
        // Give the paused consumer a moment to drain the pending counter
        // on its own; flush should still report 0 or the remainder and
        // never panic, and the queue must still accept work afterwards.
        let _ = queue.flush().await;
        queue.resume();
        queue.enqueue(tiny_frame());
        queue.wait_for_drain().await;
        assert_eq!(sink.frames.lock().await.len(), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PacedOutputQueue::spawn(4, sink, noop_backpressure());
        queue.stop().await;
        queue.stop().await;
    }
}
