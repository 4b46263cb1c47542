//! # Timeout Policy
//!
//! Per-phase time budgets and the racer that holds a lifecycle call to its
//! budget. A phase that overruns its soft budget is warned about and left
//! running; a phase that overruns its hard budget is either abandoned
//! (`die_on_timeout`) or escalated to an error log and awaited anyway.
//! There is no cancellation: an abandoned call keeps running in the
//! background and its eventual resolution is ignored.

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, warn};

/// The five lifecycle phases a unit moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Load,
    Initialize,
    Attach,
    Detach,
    Release,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Initialize => write!(f, "initialize"),
            Self::Attach => write!(f, "attach"),
            Self::Detach => write!(f, "detach"),
            Self::Release => write!(f, "release"),
        }
    }
}

/// Budget for a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimeout {
    /// Hard budget in milliseconds.
    pub millis: u64,
    /// Treat a hard overrun as a phase failure instead of waiting it out.
    pub die_on_timeout: bool,
    /// Interval at which a still-running phase is warned about.
    pub warning_millis: u64,
}

impl PhaseTimeout {
    pub fn new(millis: u64, die_on_timeout: bool, warning_millis: u64) -> Self {
        Self {
            millis,
            die_on_timeout,
            warning_millis,
        }
    }
}

/// Per-unit budgets for every phase.
///
/// Load gets a larger soft budget than the in-process phases since it
/// usually crosses the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimeouts {
    pub load: PhaseTimeout,
    pub initialize: PhaseTimeout,
    pub attach: PhaseTimeout,
    pub detach: PhaseTimeout,
    pub release: PhaseTimeout,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            load: PhaseTimeout::new(10_000, false, 1_000),
            initialize: PhaseTimeout::new(4_500, false, 1_000),
            attach: PhaseTimeout::new(3_000, false, 1_000),
            detach: PhaseTimeout::new(3_000, false, 1_000),
            release: PhaseTimeout::new(3_000, false, 1_000),
        }
    }
}

impl PhaseTimeouts {
    pub fn for_phase(&self, phase: Phase) -> PhaseTimeout {
        match phase {
            Phase::Load => self.load,
            Phase::Initialize => self.initialize,
            Phase::Attach => self.attach,
            Phase::Detach => self.detach,
            Phase::Release => self.release,
        }
    }
}

/// A phase exceeded its hard budget with `die_on_timeout` set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{phase} for unit '{unit}' did not resolve within {millis} ms")]
pub struct TimeoutOverrun {
    pub unit: String,
    pub phase: Phase,
    pub millis: u64,
}

/// Race a lifecycle call against its budget.
///
/// Warnings are emitted every `warning_millis` until the hard budget; past
/// the hard budget the call either fails (`die_on_timeout`) or is logged at
/// error level and awaited to completion.
pub async fn reasonable_time<T>(
    unit: &str,
    phase: Phase,
    budget: PhaseTimeout,
    fut: impl Future<Output = T>,
) -> std::result::Result<T, TimeoutOverrun> {
    let mut fut = pin!(fut);
    let start = Instant::now();
    let hard = Duration::from_millis(budget.millis);
    let warn_every = Duration::from_millis(budget.warning_millis.max(1));
    let mut checkpoint = warn_every.min(hard);

    loop {
        tokio::select! {
            out = &mut fut => return Ok(out),
            _ = tokio::time::sleep_until(start + checkpoint) => {
                if checkpoint >= hard {
                    if budget.die_on_timeout {
                        return Err(TimeoutOverrun {
                            unit: unit.to_string(),
                            phase,
                            millis: budget.millis,
                        });
                    }
                    error!(
                        unit,
                        phase = %phase,
                        budget_ms = budget.millis,
                        "lifecycle phase exceeded its budget, waiting for it anyway"
                    );
                    return Ok(fut.await);
                }
                warn!(
                    unit,
                    phase = %phase,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    budget_ms = budget.millis,
                    "lifecycle phase still running"
                );
                checkpoint = (checkpoint + warn_every).min(hard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolves_within_budget() {
        let budget = PhaseTimeout::new(1_000, true, 100);
        let out = reasonable_time("a", Phase::Attach, budget, async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn hard_overrun_fails_when_dying_on_timeout() {
        let budget = PhaseTimeout::new(50, true, 10);
        let out = reasonable_time("a", Phase::Attach, budget, std::future::pending::<()>()).await;
        assert_eq!(
            out,
            Err(TimeoutOverrun {
                unit: "a".to_string(),
                phase: Phase::Attach,
                millis: 50,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn soft_overrun_waits_for_completion() {
        let budget = PhaseTimeout::new(50, false, 10);
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            42
        };
        let out = reasonable_time("a", Phase::Detach, budget, slow).await;
        assert_eq!(out, Ok(42));
    }

    #[test]
    fn default_budgets_are_soft() {
        let t = PhaseTimeouts::default();
        assert_eq!(t.initialize.millis, 4_500);
        assert_eq!(t.attach.millis, 3_000);
        assert!(!t.for_phase(Phase::Release).die_on_timeout);
    }
}
