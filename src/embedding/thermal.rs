//! Thermal Timeout Policy: a pure function of a remote
//! embedder's thermal state and per-attempt inputs, shared by both
//! remote backends. Each backend supplies only its own base constants.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-backend base constants.
#[derive(Debug, Clone, Copy)]
pub struct ThermalConfig {
    pub warm_timeout: Duration,
    pub cold_timeout: Duration,
    pub unload_threshold: Duration,
    pub retry_multiplier: f64,
    pub progression_cap: f64,
    /// Chunks-per-unit-progression normalizer; a property of the
    /// backend's observed throughput (1000 for mlx, 2000 for ollama).
    pub normalizer: f64,
    pub batch_size: usize,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            warm_timeout: Duration::from_secs(120),
            cold_timeout: Duration::from_secs(180),
            unload_threshold: Duration::from_secs(5 * 60),
            retry_multiplier: 1.0,
            progression_cap: 3.0,
            normalizer: 1000.0,
            batch_size: 32,
        }
    }
}

impl ThermalConfig {
    pub fn mlx() -> Self {
        Self {
            normalizer: 1000.0,
            ..Self::default()
        }
    }

    pub fn ollama() -> Self {
        Self {
            normalizer: 2000.0,
            ..Self::default()
        }
    }
}

/// Per-instance mutable thermal state.
#[derive(Debug)]
pub struct ThermalState {
    inner: Mutex<ThermalStateInner>,
}

#[derive(Debug, Clone, Copy)]
struct ThermalStateInner {
    batch_index: u64,
    final_batch: bool,
    last_call: Option<Instant>,
}

impl Default for ThermalState {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ThermalStateInner {
                batch_index: 0,
                final_batch: false,
                last_call: None,
            }),
        }
    }

    pub fn set_batch_index(&self, index: u64) {
        self.inner.lock().unwrap().batch_index = index;
    }

    pub fn batch_index(&self) -> u64 {
        self.inner.lock().unwrap().batch_index
    }

    pub fn increment_batch_index(&self) {
        self.inner.lock().unwrap().batch_index += 1;
    }

    pub fn set_final_batch(&self, is_final: bool) {
        self.inner.lock().unwrap().final_batch = is_final;
    }

    pub fn final_batch(&self) -> bool {
        self.inner.lock().unwrap().final_batch
    }

    pub fn record_success(&self) {
        self.inner.lock().unwrap().last_call = Some(Instant::now());
    }

    fn last_call(&self) -> Option<Instant> {
        self.inner.lock().unwrap().last_call
    }

    fn is_warm(&self, config: &ThermalConfig, now: Instant) -> bool {
        match self.last_call() {
            None => false,
            Some(last) => now.duration_since(last) <= config.unload_threshold,
        }
    }

    /// Compute the effective timeout for the next attempt:
    ///
    /// ```text
    /// base        = cold if (no last-call OR stale) else warm
    /// progression = clamp(1 + (batch_index * batch_size) / normalizer, 1, cap)
    /// retry_scale = clamp(retry_multiplier ^ attempt, 1, 2)
    /// final_boost = 1.5 if final_batch else 1
    /// timeout     = base * progression * retry_scale * final_boost
    /// ```
    pub fn effective_timeout(&self, config: &ThermalConfig, attempt: u32) -> Duration {
        let now = Instant::now();
        let base = if self.is_warm(config, now) {
            config.warm_timeout
        } else {
            config.cold_timeout
        };

        let batch_index = self.batch_index();
        let progression = (1.0
            + (batch_index as f64 * config.batch_size as f64) / config.normalizer.max(1.0))
        .clamp(1.0, config.progression_cap.max(1.0));

        let retry_scale = config.retry_multiplier.powi(attempt as i32).clamp(1.0, 2.0);

        let final_boost = if self.final_batch() { 1.5 } else { 1.0 };

        base.mul_f64(progression * retry_scale * final_boost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_when_never_called() {
        let state = ThermalState::new();
        let config = ThermalConfig::default();
        let t = state.effective_timeout(&config, 0);
        assert_eq!(t, config.cold_timeout);
    }

    #[test]
    fn warm_after_recent_call() {
        let state = ThermalState::new();
        state.record_success();
        let config = ThermalConfig::default();
        let t = state.effective_timeout(&config, 0);
        assert_eq!(t, config.warm_timeout);
    }

    #[test]
    fn monotonic_in_attempt() {
        let state = ThermalState::new();
        let config = ThermalConfig {
            retry_multiplier: 1.5,
            ..ThermalConfig::default()
        };
        let t0 = state.effective_timeout(&config, 0);
        let t1 = state.effective_timeout(&config, 1);
        let t2 = state.effective_timeout(&config, 2);
        assert!(t0 <= t1);
        assert!(t1 <= t2);
    }

    #[test]
    fn monotonic_in_batch_index() {
        let state = ThermalState::new();
        let config = ThermalConfig::default();
        let t0 = state.effective_timeout(&config, 0);
        state.set_batch_index(500);
        let t1 = state.effective_timeout(&config, 0);
        state.set_batch_index(5000);
        let t2 = state.effective_timeout(&config, 0);
        assert!(t0 <= t1);
        assert!(t1 <= t2);
    }

    #[test]
    fn final_batch_boosts_timeout() {
        let state = ThermalState::new();
        let config = ThermalConfig::default();
        let without = state.effective_timeout(&config, 0);
        state.set_final_batch(true);
        let with = state.effective_timeout(&config, 0);
        assert!(with >= without);
    }

    #[test]
    fn progression_is_capped() {
        let state = ThermalState::new();
        let config = ThermalConfig::default();
        state.set_batch_index(10_000_000);
        let t = state.effective_timeout(&config, 0);
        // cold_timeout * progression_cap(3) * retry_scale(1) * final_boost(1)
        let expected = config.cold_timeout.mul_f64(config.progression_cap);
        assert_eq!(t, expected);
    }
}
