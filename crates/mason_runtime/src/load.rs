//! Host load probes for admission control.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the one-minute load average
pub trait LoadProbe: Send + Sync {
    fn load_average(&self) -> f64;
}

/// Load average of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoad;

impl LoadProbe for SystemLoad {
    fn load_average(&self) -> f64 {
        sysinfo::System::load_average().one
    }
}

/// Load average set by hand
#[derive(Debug, Default)]
pub struct FixedLoad(AtomicU64);

impl FixedLoad {
    #[must_use]
    pub fn new(load: f64) -> Self {
        Self(AtomicU64::new(load.to_bits()))
    }

    pub fn set(&self, load: f64) {
        self.0.store(load.to_bits(), Ordering::Relaxed);
    }
}

impl LoadProbe for FixedLoad {
    fn load_average(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_load() {
        let load = FixedLoad::new(1.5);
        assert_eq!(load.load_average(), 1.5);
        load.set(0.25);
        assert_eq!(load.load_average(), 0.25);
    }

    #[test]
    fn test_system_load_is_finite() {
        assert!(SystemLoad.load_average().is_finite());
    }
}
