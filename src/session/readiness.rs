//! Readiness of the statistical backend
//!
//! The backend is brought up lazily, once per session. Concurrent callers of
//! [`ReadinessGate::ensure_ready`] share one in-flight initialization: the
//! first caller runs it, later callers wait for its outcome.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{DgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
}

impl ReadinessState {
    fn is_settled(&self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::Failed(_))
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Uninitialized => f.write_str("uninitialized"),
            ReadinessState::Initializing => f.write_str("initializing"),
            ReadinessState::Ready => f.write_str("ready"),
            ReadinessState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Single-flight gate over backend initialization
#[derive(Debug)]
pub struct ReadinessGate {
    state: watch::Sender<ReadinessState>,
    timeout: Duration,
}

/// Marks the gate failed if the initializing caller is dropped mid-flight
struct InFlight<'a> {
    state: &'a watch::Sender<ReadinessState>,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, state: ReadinessState) {
        self.state.send_replace(state);
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state
                .send_replace(ReadinessState::Failed("initialization was cancelled".to_string()));
        }
    }
}

impl ReadinessGate {
    pub fn new(timeout: Duration) -> Self {
        let (state, _) = watch::channel(ReadinessState::Uninitialized);
        Self { state, timeout }
    }

    pub fn state(&self) -> ReadinessState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ReadinessState::Ready
    }

    /// Reject work unless the backend is ready
    pub fn check_ready(&self) -> Result<()> {
        match &*self.state.borrow() {
            ReadinessState::Ready => Ok(()),
            other => Err(DgeError::BackendNotReady { state: other.to_string() }),
        }
    }

    /// Run `init` unless the backend is ready or already initializing
    ///
    /// A caller arriving while another initialization is in flight waits for
    /// it instead of starting a second one. A failed initialization may be
    /// retried by a later call. `init` is bounded by the gate's timeout.
    pub async fn ensure_ready<F>(&self, init: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let mut leader = false;
        self.state.send_if_modified(|state| match state {
            ReadinessState::Uninitialized | ReadinessState::Failed(_) => {
                *state = ReadinessState::Initializing;
                leader = true;
                true
            }
            _ => false,
        });

        if !leader {
            return self.await_ready().await;
        }

        let guard = InFlight {
            state: &self.state,
            settled: false,
        };
        log::info!("Initializing statistical backend");
        let outcome = match tokio::time::timeout(self.timeout, init).await {
            Ok(result) => result,
            Err(_) => Err(DgeError::ExternalServiceTimeout {
                service: "statistical backend".to_string(),
                seconds: self.timeout.as_secs(),
            }),
        };
        match &outcome {
            Ok(()) => {
                log::info!("Statistical backend ready");
                guard.settle(ReadinessState::Ready);
            }
            Err(e) => {
                log::warn!("Statistical backend failed to initialize: {}", e);
                guard.settle(ReadinessState::Failed(e.to_string()));
            }
        }
        outcome
    }

    /// Wait for an in-flight initialization to settle
    ///
    /// Returns immediately when ready, and fails with `BackendNotReady` when
    /// nothing is initializing or the initialization failed.
    pub async fn await_ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        if *rx.borrow() == ReadinessState::Uninitialized {
            return self.check_ready();
        }
        let settled = rx
            .wait_for(ReadinessState::is_settled)
            .await
            .map_err(|_| DgeError::BackendNotReady {
                state: "readiness channel closed".to_string(),
            })?
            .clone();
        match settled {
            ReadinessState::Ready => Ok(()),
            other => Err(DgeError::BackendNotReady { state: other.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_check_before_init_is_rejected() {
        let gate = ReadinessGate::new(Duration::from_secs(5));
        assert!(matches!(gate.check_ready(), Err(DgeError::BackendNotReady { .. })));
        assert!(matches!(gate.await_ready().await, Err(DgeError::BackendNotReady { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_initialization() {
        let gate = Arc::new(ReadinessGate::new(Duration::from_secs(5)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                gate.ensure_ready(async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(gate.is_ready());

        gate.ensure_ready(async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_named() {
        let gate = ReadinessGate::new(Duration::from_secs(10));
        let err = gate
            .ensure_ready(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        match err {
            DgeError::ExternalServiceTimeout { service, seconds } => {
                assert_eq!(service, "statistical backend");
                assert_eq!(seconds, 10);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(matches!(gate.state(), ReadinessState::Failed(_)));
    }

    #[tokio::test]
    async fn test_failure_can_be_retried() {
        let gate = ReadinessGate::new(Duration::from_secs(5));
        let first = gate
            .ensure_ready(async {
                Err(DgeError::InvalidInput {
                    reason: "boom".to_string(),
                })
            })
            .await;
        assert!(first.is_err());
        assert!(gate.check_ready().unwrap_err().to_string().contains("boom"));

        gate.ensure_ready(async { Ok(()) }).await.unwrap();
        assert!(gate.is_ready());
    }
}
