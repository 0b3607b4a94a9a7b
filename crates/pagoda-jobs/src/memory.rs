//! Worker memory gate.
//!
//! Before a task is accepted, resident memory is checked against the
//! configured cap. Above the threshold the worker yields briefly so the
//! allocator can return freed pages, re-checks, and rejects the task with a
//! memory-pressure error so the queue redelivers it later.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

use pagoda_core::defaults::MEMORY_PRESSURE_THRESHOLD;
use pagoda_core::{Error, Result};

/// Memory cap configuration.
#[derive(Debug, Clone)]
pub struct MemoryGate {
    /// Cap in bytes the worker's resident set is measured against.
    pub cap_bytes: u64,
    /// Fraction of the cap above which tasks are rejected.
    pub threshold: f64,
}

impl MemoryGate {
    /// Build from `WORKER_MEMORY_CAP_BYTES`, defaulting to total system
    /// memory.
    pub fn from_env() -> Self {
        let cap_bytes = std::env::var("WORKER_MEMORY_CAP_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                let mut system = System::new();
                system.refresh_memory();
                system.total_memory()
            });

        Self {
            cap_bytes,
            threshold: MEMORY_PRESSURE_THRESHOLD,
        }
    }

    fn resident_bytes() -> u64 {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Fraction of the cap currently resident.
    pub fn usage(&self) -> f64 {
        if self.cap_bytes == 0 {
            return 0.0;
        }
        Self::resident_bytes() as f64 / self.cap_bytes as f64
    }

    /// Enforce the gate. Returns `MemoryPressure` if usage stays above the
    /// threshold after the collection hint.
    pub async fn check(&self) -> Result<()> {
        let usage = self.usage();
        if usage <= self.threshold {
            return Ok(());
        }

        warn!(
            subsystem = "jobs",
            usage_pct = usage * 100.0,
            "Memory usage above threshold; yielding before re-check"
        );

        // Collection hint: give the allocator a moment to return pages.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let usage = self.usage();
        if usage > self.threshold {
            return Err(Error::MemoryPressure(format!(
                "resident memory at {:.1}% of cap exceeds {:.0}% threshold",
                usage * 100.0,
                self.threshold * 100.0
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_fraction_of_cap() {
        let gate = MemoryGate {
            cap_bytes: u64::MAX,
            threshold: MEMORY_PRESSURE_THRESHOLD,
        };
        let usage = gate.usage();
        assert!(usage >= 0.0 && usage < 0.01);
    }

    #[test]
    fn zero_cap_reads_as_idle() {
        let gate = MemoryGate {
            cap_bytes: 0,
            threshold: MEMORY_PRESSURE_THRESHOLD,
        };
        assert_eq!(gate.usage(), 0.0);
    }

    #[tokio::test]
    async fn generous_cap_passes_the_gate() {
        let gate = MemoryGate {
            cap_bytes: u64::MAX,
            threshold: MEMORY_PRESSURE_THRESHOLD,
        };
        assert!(gate.check().await.is_ok());
    }

    #[tokio::test]
    async fn tiny_cap_trips_the_gate() {
        let gate = MemoryGate {
            cap_bytes: 1,
            threshold: MEMORY_PRESSURE_THRESHOLD,
        };
        let err = gate.check().await.unwrap_err();
        assert!(matches!(err, Error::MemoryPressure(_)));
    }
}
