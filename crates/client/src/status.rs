//! Elapsed time, throughput and ETA derived from driver state.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::{TransferPhase, TransferState};

/// Point-in-time snapshot of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStatus {
    pub phase: TransferPhase,
    pub offset: u64,
    pub declared_size: u64,
    pub chunk_size: usize,
    /// Bytes per second of the last chunk.
    pub speed: f64,
    /// Active time, pauses excluded.
    pub elapsed: Duration,
    pub estimate_remaining: Duration,
    pub retry_count: u32,
}

impl TransferStatus {
    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.declared_size == 0 {
            return if self.phase == TransferPhase::Done { 1.0 } else { 0.0 };
        }
        (self.offset as f64 / self.declared_size as f64).min(1.0)
    }
}

/// Derives [`TransferStatus`] from a [`TransferState`]. Stateless.
pub struct StatusReporter;

impl StatusReporter {
    /// `elapsed` must already exclude paused time.
    pub fn report(state: &TransferState, declared_size: u64, elapsed: Duration) -> TransferStatus {
        TransferStatus {
            phase: state.phase,
            offset: state.offset,
            declared_size,
            chunk_size: state.chunk_size,
            speed: state.speed,
            elapsed,
            estimate_remaining: Self::estimate_remaining(state, declared_size, elapsed),
            retry_count: state.retry_count,
        }
    }

    /// `declared / (offset / elapsed) - elapsed`, or zero without a speed sample.
    fn estimate_remaining(
        state: &TransferState,
        declared_size: u64,
        elapsed: Duration,
    ) -> Duration {
        if state.speed <= 0.0 || state.offset == 0 {
            return Duration::ZERO;
        }
        let secs = elapsed.as_secs_f64();
        let average = state.offset as f64 / secs.max(1e-6);
        let total = declared_size as f64 / average;
        Duration::try_from_secs_f64(total - secs).unwrap_or(Duration::ZERO)
    }
}

/// Wall clock that excludes paused intervals.
#[derive(Debug, Clone, Default)]
pub struct TransferClock {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl TransferClock {
    pub fn start(&mut self, now: Instant) {
        self.started = Some(now);
        self.paused_at = None;
        self.paused_total = Duration::ZERO;
    }

    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Re-bases the clock by the length of the pause.
    pub fn resume(&mut self, now: Instant) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(at);
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let Some(started) = self.started else {
            return Duration::ZERO;
        };
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(started)
            .saturating_sub(self.paused_total)
    }
}
