//! Resource probes: where the autoscaler's utilization signal comes from.

use std::sync::Mutex;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::warn;

use taskgrid_core::Utilization;

/// Reports aggregate host utilization, each value in `0.0..=1.0`.
pub trait ResourceProbe: Send + Sync + 'static {
    fn utilization(&self) -> Utilization;
}

/// Fixed readings. Useful in tests and where scaling should ignore load.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe {
    reading: Utilization,
}

impl StaticProbe {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            reading: Utilization {
                cpu: cpu.clamp(0.0, 1.0),
                memory: memory.clamp(0.0, 1.0),
            },
        }
    }

    /// Zero load; scale-up is never blocked.
    pub fn idle() -> Self {
        Self::default()
    }
}

impl ResourceProbe for StaticProbe {
    fn utilization(&self) -> Utilization {
        self.reading
    }
}

/// Host CPU and memory via `sysinfo`.
///
/// CPU usage is computed between successive refreshes, so the first reading
/// after construction may be 0.
pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(MemoryRefreshKind::new().with_ram()),
        );
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe").finish_non_exhaustive()
    }
}

impl ResourceProbe for SystemProbe {
    fn utilization(&self) -> Utilization {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("system probe lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu = f64::from(system.global_cpu_usage()) / 100.0;
        let total = system.total_memory();
        let memory = if total > 0 {
            system.used_memory() as f64 / total as f64
        } else {
            0.0
        };

        Utilization {
            cpu: cpu.clamp(0.0, 1.0),
            memory: memory.clamp(0.0, 1.0),
        }
    }
}
