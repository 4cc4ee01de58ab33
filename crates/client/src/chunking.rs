use std::time::Duration;

/// Adaptive chunk size.
///
/// Hill-climbs on measured throughput: a chunk faster than the previous one
/// grows the size by one step, anything else shrinks it by one step. The
/// size is clamped to `[min, max]` and starts at `min`.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    min: usize,
    step: usize,
    max: usize,
    current: usize,
    last_speed: f64,
}

impl ChunkSizer {
    pub fn new(min: usize, step: usize, max: usize) -> Self {
        Self {
            min,
            step,
            max,
            current: min,
            last_speed: 0.0,
        }
    }

    /// Size of the next chunk.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Feeds one round trip and returns the adapted size.
    pub fn observe(&mut self, bytes: usize, elapsed: Duration) -> usize {
        let speed = throughput(bytes, elapsed);
        self.current = if speed > self.last_speed {
            self.current.saturating_add(self.step).min(self.max)
        } else {
            self.current.saturating_sub(self.step).max(self.min)
        };
        self.last_speed = speed;
        self.current
    }
}

/// Bytes per second; a zero duration counts as one microsecond.
pub fn throughput(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(1e-6);
    bytes as f64 / secs
}
