//! Execution pool sizing

use serde::Serialize;

/// At or below this many logical cores the pipeline runs one job at a time
const SEQUENTIAL_MAX_CORES: usize = 3;
/// Unit ceiling on ordinary desktop-class devices
const DESKTOP_UNIT_CEILING: usize = 8;
/// Unit ceiling on mobile-class or memory-constrained devices
const CONSTRAINED_UNIT_CEILING: usize = 3;
/// Devices reporting at most this much memory count as constrained
const LOW_MEMORY_GB: f64 = 4.0;
const DESKTOP_BATCH_CEILING: usize = 4;
const CONSTRAINED_BATCH_CEILING: usize = 2;

/// What the device says about itself
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceHints {
    pub logical_cores: usize,
    pub memory_gb: Option<f64>,
    pub mobile: bool,
}

impl DeviceHints {
    /// Hints for the current process; memory is not probed
    #[must_use]
    pub fn detect() -> Self {
        let logical_cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            logical_cores,
            memory_gb: None,
            mobile: false,
        }
    }

    #[must_use]
    pub fn constrained(&self) -> bool {
        self.mobile || self.memory_gb.is_some_and(|gb| gb <= LOW_MEMORY_GB)
    }
}

/// Pool configuration for one load session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolPlan {
    pub unit_count: usize,
    /// `None` means unlimited
    pub batch_size_ceiling: Option<usize>,
    pub sequential: bool,
}

impl PoolPlan {
    /// Size the pool once per session. `desired_ceiling` is the caller's
    /// own cap on units; zero is treated as one.
    #[must_use]
    pub fn size(hints: DeviceHints, desired_ceiling: usize) -> Self {
        if hints.logical_cores <= SEQUENTIAL_MAX_CORES {
            return Self::sequential();
        }

        let (hard_ceiling, batch_ceiling) = if hints.constrained() {
            (CONSTRAINED_UNIT_CEILING, CONSTRAINED_BATCH_CEILING)
        } else {
            (DESKTOP_UNIT_CEILING, DESKTOP_BATCH_CEILING)
        };
        let ceiling = hard_ceiling.min(desired_ceiling.max(1));
        // One logical core stays with the interactive thread
        let unit_count = (hints.logical_cores - 1).clamp(1, ceiling);

        Self {
            unit_count,
            batch_size_ceiling: Some(batch_ceiling),
            sequential: false,
        }
    }

    #[must_use]
    pub fn sequential() -> Self {
        Self {
            unit_count: 1,
            batch_size_ceiling: None,
            sequential: true,
        }
    }
}
