//! Polls a started service until it answers ready, the attempt budget is
//! exhausted, or the deadline passes — whichever comes first.
//!
//! A timed-out wait leaves the process running: healthiness and liveness
//! are tracked separately, and what a readiness failure means for the rest
//! of the session is the orchestrator's decision, not this crate's.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod probe;

pub use probe::{Probe, ProbeContext, for_target};

use std::time::Duration;

use geostack_registry::ReadinessSpec;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The service answered ready.
    Ready {
        /// Probes issued, including the successful one.
        attempts: u32,
    },
    /// The attempt budget or the deadline ran out first.
    TimedOut {
        /// Probes issued before giving up.
        attempts: u32,
    },
    /// An external stop interrupted the wait.
    Interrupted,
}

impl Outcome {
    /// Whether the service reached ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Drives readiness probes with bounded, cancellable polling.
#[derive(Debug, Clone, Default)]
pub struct ReadinessChecker {
    http: reqwest::Client,
}

impl ReadinessChecker {
    /// Creates a checker with a shared HTTP client for endpoint probes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Runs the probe declared by `spec` once, outside any poll loop.
    /// Used by read-only status queries.
    pub async fn probe_once(&self, spec: &ReadinessSpec, ctx: &ProbeContext) -> bool {
        probe::for_target(&spec.probe, &self.http).check(ctx).await
    }

    /// Polls the probe declared by `spec` until ready, timeout, attempt
    /// exhaustion or cancellation.
    pub async fn wait_ready(
        &self,
        spec: &ReadinessSpec,
        ctx: &ProbeContext,
        cancel: &CancellationToken,
    ) -> Outcome {
        let probe = probe::for_target(&spec.probe, &self.http);
        self.wait_probe(
            probe.as_ref(),
            spec.interval,
            spec.timeout,
            spec.max_attempts,
            ctx,
            cancel,
        )
        .await
    }

    /// Polls an arbitrary probe with the given bounds.
    ///
    /// Stops at the first success, after `max_attempts` probes, or when
    /// `timeout` elapses — whichever comes first. The wait is select-driven
    /// so a hung probe attempt cannot outlive the deadline, and an external
    /// cancellation interrupts immediately.
    pub async fn wait_probe(
        &self,
        probe: &dyn Probe,
        interval: Duration,
        timeout: Duration,
        max_attempts: u32,
        ctx: &ProbeContext,
        cancel: &CancellationToken,
    ) -> Outcome {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0;

        while attempts < max_attempts {
            if Instant::now() >= deadline {
                break;
            }
            attempts += 1;

            tokio::select! {
                ready = probe.check(ctx) => {
                    if ready {
                        debug!(probe = %probe.describe(), attempts, "ready");
                        return Outcome::Ready { attempts };
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    warn!(probe = %probe.describe(), attempts, "readiness deadline elapsed mid-probe");
                    return Outcome::TimedOut { attempts };
                }
                () = cancel.cancelled() => return Outcome::Interrupted,
            }

            if attempts >= max_attempts {
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = tokio::time::sleep_until(deadline) => {
                    warn!(probe = %probe.describe(), attempts, "readiness deadline elapsed");
                    return Outcome::TimedOut { attempts };
                }
                () = cancel.cancelled() => return Outcome::Interrupted,
            }
        }

        warn!(probe = %probe.describe(), attempts, "service did not become ready");
        Outcome::TimedOut { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::SystemTime;

    use async_trait::async_trait;
    use geostack_registry::ProbeTarget;
    use tokio::io::AsyncWriteExt;

    fn ctx() -> ProbeContext {
        ProbeContext {
            started_at: SystemTime::now(),
        }
    }

    fn spec(probe: ProbeTarget, interval_ms: u64, timeout_ms: u64, max: u32) -> ReadinessSpec {
        serde_json::from_value(serde_json::json!({
            "kind": "port", "target": 1,
            "interval": interval_ms, "timeout": timeout_ms, "maxAttempts": max,
        }))
        .map(|mut s: ReadinessSpec| {
            s.probe = probe;
            s
        })
        .unwrap()
    }

    struct FixedProbe {
        ready: bool,
        calls: AtomicU32,
    }

    impl FixedProbe {
        fn new(ready: bool) -> Self {
            Self {
                ready,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for FixedProbe {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        async fn check(&self, _ctx: &ProbeContext) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ready
        }
    }

    #[tokio::test]
    async fn ready_on_first_successful_probe() {
        let probe = FixedProbe::new(true);
        let out = ReadinessChecker::new()
            .wait_probe(
                &probe,
                Duration::from_millis(10),
                Duration::from_secs(5),
                10,
                &ctx(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(out, Outcome::Ready { attempts: 1 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_exceeds_max_attempts() {
        let probe = FixedProbe::new(false);
        let out = ReadinessChecker::new()
            .wait_probe(
                &probe,
                Duration::from_millis(5),
                Duration::from_secs(30),
                3,
                &ctx(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(out, Outcome::TimedOut { attempts: 3 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_outlives_the_deadline() {
        let probe = FixedProbe::new(false);
        let started = std::time::Instant::now();
        let out = ReadinessChecker::new()
            .wait_probe(
                &probe,
                Duration::from_millis(50),
                Duration::from_millis(150),
                1000,
                &ctx(),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(out, Outcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(probe.calls.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let cancel_in_a_bit = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_in_a_bit.cancel();
        });

        let probe = FixedProbe::new(false);
        let out = ReadinessChecker::new()
            .wait_probe(
                &probe,
                Duration::from_secs(5),
                Duration::from_secs(60),
                100,
                &ctx(),
                &cancel,
            )
            .await;

        assert_eq!(out, Outcome::Interrupted);
    }

    #[tokio::test]
    async fn port_probe_sees_a_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let out = ReadinessChecker::new()
            .wait_ready(
                &spec(ProbeTarget::Port(port), 10, 2_000, 5),
                &ctx(),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_ready());
    }

    #[tokio::test]
    async fn http_probe_accepts_2xx() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let url = format!("http://127.0.0.1:{port}/health").parse().unwrap();
        let out = ReadinessChecker::new()
            .wait_ready(
                &spec(ProbeTarget::Http(url), 50, 5_000, 10),
                &ctx(),
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_ready());
    }

    #[tokio::test]
    async fn file_marker_requires_mtime_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ready.marker");

        let started = ctx();
        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(&marker, "up").unwrap();

        let out = ReadinessChecker::new()
            .wait_ready(
                &spec(ProbeTarget::FileMarker(marker.clone()), 10, 2_000, 20),
                &started,
                &CancellationToken::new(),
            )
            .await;
        assert!(out.is_ready());

        // A marker older than the start time is not readiness.
        let late = ProbeContext {
            started_at: SystemTime::now() + Duration::from_secs(60),
        };
        let out = ReadinessChecker::new()
            .wait_ready(
                &spec(ProbeTarget::FileMarker(marker), 10, 100, 3),
                &late,
                &CancellationToken::new(),
            )
            .await;
        assert!(!out.is_ready());
    }
}
