//! Circuit breaker (C4, spec §4.4): per-upstream timeout, error-rate, and
//! half-open recovery.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use mcp_gateway_core::{ErrorKind, GatewayError, GatewayResult};

/// `BreakerState` (spec §3): `{state, errorCount, totalCount, openedAt}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration parameters (spec §4.4): `timeout, errorThresholdPercentage,
/// resetTimeout, volumeThreshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub error_threshold_percentage: f64,
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    pub volume_threshold: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_millis(30_000),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_millis(30_000),
            volume_threshold: 5,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: BreakerPhase,
    error_count: u64,
    total_count: u64,
    opened_at: Option<Instant>,
}

/// A subscriber callback invoked on every state transition (spec §4.4
/// "Subscribers (telemetry) observe open|half_open|closed transitions").
pub type TransitionListener = Arc<dyn Fn(&str, BreakerPhase, BreakerPhase) + Send + Sync>;

/// Wraps one upstream (identified by `session_name`) with a breaker state
/// machine. Cloning shares the same underlying state (`Arc`-backed), so a
/// single breaker instance can be stored once per session and handed to
/// concurrent callers.
#[derive(Clone)]
pub struct CircuitBreaker {
    session_name: Arc<str>,
    config: BreakerConfig,
    inner: Arc<Mutex<Inner>>,
    probe_in_flight: Arc<AtomicBool>,
    listener: Option<TransitionListener>,
}

impl CircuitBreaker {
    pub fn new(session_name: impl Into<Arc<str>>, config: BreakerConfig) -> Self {
        Self {
            session_name: session_name.into(),
            config,
            inner: Arc::new(Mutex::new(Inner {
                phase: BreakerPhase::Closed,
                error_count: 0,
                total_count: 0,
                opened_at: None,
            })),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: TransitionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current phase, lazily transitioning `open` → `half_open` once
    /// `resetTimeout` has elapsed (spec §4.4 "After resetTimeout elapses...
    /// transition to half_open on the next call").
    pub fn phase(&self) -> BreakerPhase {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        inner.phase
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.phase == BreakerPhase::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    self.transition(inner, BreakerPhase::HalfOpen);
                    self.probe_in_flight.store(false, Ordering::Release);
                }
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerPhase) {
        let from = inner.phase;
        if from == to {
            return;
        }
        inner.phase = to;
        if to == BreakerPhase::Open {
            inner.opened_at = Some(Instant::now());
        }
        if to == BreakerPhase::Closed {
            inner.error_count = 0;
            inner.total_count = 0;
            inner.opened_at = None;
        }
        tracing::info!(session = %self.session_name, from = ?from, to = ?to, "circuit breaker transition");
        if let Some(listener) = &self.listener {
            listener(&self.session_name, from, to);
        }
    }

    /// Run `fut` through the breaker: bypass entirely when disabled (spec
    /// §4.4 "When resilience.enabled=false, calls bypass the breaker
    /// entirely"), fail fast with `CIRCUIT_OPEN` when open, admit exactly one
    /// probe when half-open, and race every admitted call against `timeout`.
    pub async fn call<T, F>(&self, source_package: &str, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        if !self.config.enabled {
            return fut.await;
        }

        let admitted = self.admit()?;

        let outcome = tokio::time::timeout(self.config.timeout, fut).await;

        let result = match outcome {
            Ok(inner_result) => inner_result,
            Err(_) => Err(GatewayError::upstream_timeout(source_package, "call")),
        };

        match &result {
            Ok(_) => self.record_success(admitted),
            Err(_) => self.record_failure(admitted),
        }

        result
    }

    /// Checks whether a call should be admitted, reserving the single
    /// half-open probe slot if applicable. Returns whether this call is the
    /// probe (so completion handling knows whether to clear or reopen).
    fn admit(&self) -> GatewayResult<bool> {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.phase {
            BreakerPhase::Closed => Ok(false),
            BreakerPhase::Open => Err(GatewayError::circuit_open("mcp-gateway-resilience", self.session_name.to_string())),
            BreakerPhase::HalfOpen => {
                if self.probe_in_flight.swap(true, Ordering::AcqRel) {
                    Err(GatewayError::circuit_open("mcp-gateway-resilience", self.session_name.to_string()))
                } else {
                    Ok(true)
                }
            }
        }
    }

    fn record_success(&self, was_probe: bool) {
        let mut inner = self.inner.lock();
        inner.total_count += 1;
        if was_probe {
            self.transition(&mut inner, BreakerPhase::Closed);
            self.probe_in_flight.store(false, Ordering::Release);
            return;
        }
        if inner.phase == BreakerPhase::Closed {
            self.evaluate_closed_threshold(&mut inner);
        }
    }

    fn record_failure(&self, was_probe: bool) {
        let mut inner = self.inner.lock();
        inner.total_count += 1;
        inner.error_count += 1;
        if was_probe {
            self.transition(&mut inner, BreakerPhase::Open);
            self.probe_in_flight.store(false, Ordering::Release);
            return;
        }
        if inner.phase == BreakerPhase::Closed {
            self.evaluate_closed_threshold(&mut inner);
        }
    }

    fn evaluate_closed_threshold(&self, inner: &mut Inner) {
        if inner.total_count >= self.config.volume_threshold {
            let rate = (inner.error_count as f64 / inner.total_count as f64) * 100.0;
            if rate >= self.config.error_threshold_percentage {
                self.transition(inner, BreakerPhase::Open);
            }
        }
    }

    /// Snapshot counters, mostly for diagnostics/telemetry.
    pub fn counts(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.error_count, inner.total_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn config(volume: u64, pct: f64, reset_ms: u64, timeout_ms: u64) -> BreakerConfig {
        BreakerConfig {
            enabled: true,
            timeout: Duration::from_millis(timeout_ms),
            error_threshold_percentage: pct,
            reset_timeout: Duration::from_millis(reset_ms),
            volume_threshold: volume,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_and_blocks_fast() {
        let breaker = CircuitBreaker::new("alpha", config(1, 50.0, 1000, 1000));

        let err = breaker
            .call::<(), _>("test", async { Err(GatewayError::upstream_error("test", "x", None, "boom")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamError);
        assert_eq!(breaker.phase(), BreakerPhase::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let err = breaker
            .call::<(), _>("test", async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "upstream must not be invoked while open");
    }

    #[tokio::test]
    async fn half_open_allows_single_probe_then_closes_on_success() {
        let breaker = CircuitBreaker::new("alpha", config(1, 50.0, 20, 1000));
        let _ = breaker.call::<(), _>("test", async { Err(GatewayError::upstream_error("test", "x", None, "boom")) }).await;
        assert_eq!(breaker.phase(), BreakerPhase::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(breaker.phase(), BreakerPhase::HalfOpen);

        breaker.call::<(), _>("test", async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("alpha", config(1, 50.0, 20, 1000));
        let _ = breaker.call::<(), _>("test", async { Err(GatewayError::upstream_error("test", "x", None, "boom")) }).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(breaker.phase(), BreakerPhase::HalfOpen);

        let _ = breaker
            .call::<(), _>("test", async { Err(GatewayError::upstream_error("test", "x", None, "boom again")) })
            .await;
        assert_eq!(breaker.phase(), BreakerPhase::Open);
    }

    #[tokio::test]
    async fn timeout_counts_as_error_and_cancels_call() {
        let breaker = CircuitBreaker::new("alpha", config(1, 50.0, 1000, 10));
        let err = breaker
            .call::<(), _>("test", async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamTimeout);
        assert_eq!(breaker.phase(), BreakerPhase::Open);
    }

    #[tokio::test]
    async fn bypasses_breaker_when_disabled() {
        let mut cfg = config(1, 0.0, 1000, 1000);
        cfg.enabled = false;
        let breaker = CircuitBreaker::new("alpha", cfg);
        for _ in 0..5 {
            let _ = breaker.call::<(), _>("test", async { Err(GatewayError::upstream_error("test", "x", None, "boom")) }).await;
        }
        assert_eq!(breaker.phase(), BreakerPhase::Closed);
    }

    #[tokio::test]
    async fn monotonicity_blocks_until_reset_timeout_elapses() {
        let breaker = CircuitBreaker::new("alpha", config(1, 50.0, 200, 1000));
        let _ = breaker.call::<(), _>("test", async { Err(GatewayError::upstream_error("test", "x", None, "boom")) }).await;
        assert_eq!(breaker.phase(), BreakerPhase::Open);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = breaker.call::<(), _>("test", async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
    }
}
