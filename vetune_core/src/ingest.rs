//! Background telemetry ingestion.
//!
//! Spawns a thread that owns the `TelemetrySource`, feeds every frame into a
//! shared `Tuner`, and tracks the last-ok timestamp for stall detection. The
//! thread is shut down and joined when the `Ingestor` is dropped.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use vetune_traits::TelemetrySource;
use vetune_traits::clock::Clock;

use crate::error::TuneError;
use crate::session::Tuner;
use crate::source_error::map_source_error;
use crate::util::RateLimitedLog;

/// Why the ingest thread stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestExit {
    /// The source reported end of stream.
    EndOfStream,
    /// Shutdown was requested.
    Shutdown,
}

pub struct Ingestor {
    done: xch::Receiver<IngestExit>,
    exit: Option<IngestExit>,
    last_ok: Arc<AtomicU64>,
    frames: Arc<AtomicU64>,
    source_errors: Arc<AtomicU64>,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Ingestor {
    /// `timeout` is passed to every `next_sample` call. Transport errors are
    /// logged (rate-limited) and retried after `timeout`.
    pub fn spawn<S, C>(tuner: Arc<Tuner>, mut source: S, timeout: Duration, clock: C) -> Self
    where
        S: TelemetrySource + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, done) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_t = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_t = last_ok.clone();
        let frames = Arc::new(AtomicU64::new(0));
        let frames_t = frames.clone();
        let source_errors = Arc::new(AtomicU64::new(0));
        let source_errors_t = source_errors.clone();
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            let mut err_log = RateLimitedLog::new(5_000);
            let exit = loop {
                if shutdown_t.load(Ordering::Relaxed) {
                    tracing::debug!("ingest thread received shutdown signal");
                    break IngestExit::Shutdown;
                }
                match source.next_sample(timeout) {
                    Ok(Some(sample)) => {
                        tuner.ingest(&sample);
                        frames_t.fetch_add(1, Ordering::Relaxed);
                        last_ok_t.store(clock.ms_since(epoch), Ordering::Relaxed);
                    }
                    Ok(None) => {
                        tracing::debug!("telemetry source exhausted");
                        break IngestExit::EndOfStream;
                    }
                    Err(e) => match map_source_error(e.as_ref()) {
                        TuneError::Timeout => {
                            tracing::trace!("telemetry read timed out");
                        }
                        other => {
                            source_errors_t.fetch_add(1, Ordering::Relaxed);
                            if let Some(suppressed) = err_log.hit(clock.ms_since(epoch)) {
                                tracing::warn!(error = %other, suppressed, "telemetry source error; retrying");
                            }
                            clock.sleep(timeout);
                        }
                    },
                }
            };
            // Receiver may already be gone; nothing to report to then.
            let _ = tx.send(exit);
            tracing::trace!("ingest thread exiting cleanly");
        });

        Self {
            done,
            exit: None,
            last_ok,
            frames,
            source_errors,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Block up to `timeout` for the thread to finish.
    pub fn wait(&mut self, timeout: Duration) -> Option<IngestExit> {
        if self.exit.is_none() {
            self.exit = self.done.recv_timeout(timeout).ok();
        }
        self.exit.clone()
    }

    /// Non-blocking check for thread exit.
    pub fn try_exit(&mut self) -> Option<IngestExit> {
        if self.exit.is_none() {
            self.exit = self.done.try_recv().ok();
        }
        self.exit.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn source_errors(&self) -> u64 {
        self.source_errors.load(Ordering::Relaxed)
    }

    /// Milliseconds since the last good frame, measured against `now_ms`
    /// on the same epoch as the ingest clock.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }

    /// `stalled_for` against the real monotonic clock.
    pub fn stalled_for_now(&self) -> u64 {
        let ms = Instant::now().saturating_duration_since(self.epoch).as_millis();
        self.stalled_for(u64::try_from(ms).unwrap_or(u64::MAX))
    }
}

impl Drop for Ingestor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Exits at the next loop check, after the in-flight read returns
        // (bounded by the source timeout).
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("ingest thread joined"),
                Err(e) => tracing::warn!(?e, "ingest thread panicked during shutdown"),
            }
        }
    }
}
