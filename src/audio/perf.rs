//! Render performance counters
//!
//! Written by the audio callback, read by the control context. Everything is a
//! relaxed atomic; a snapshot may mix values from adjacent periods.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Smoothing factor for the CPU load estimate
const LOAD_SMOOTHING: f32 = 0.1;

#[inline]
pub(crate) fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

#[inline]
pub(crate) fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

pub struct PerfCounters {
    render_min_ns: AtomicU64,
    render_max_ns: AtomicU64,
    render_total_ns: AtomicU64,
    render_count: AtomicU64,
    underruns: AtomicU64,
    clamped_periods: AtomicU64,
    cpu_load: AtomicU32,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerfSnapshot {
    pub render_min_us: f64,
    pub render_avg_us: f64,
    pub render_max_us: f64,
    pub render_count: u64,
    pub underruns: u64,
    pub clamped_periods: u64,
    pub cpu_load: f32,
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            render_min_ns: AtomicU64::new(u64::MAX),
            render_max_ns: AtomicU64::new(0),
            render_total_ns: AtomicU64::new(0),
            render_count: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            clamped_periods: AtomicU64::new(0),
            cpu_load: AtomicU32::new(f32_to_u32(0.0)),
        }
    }

    /// Time spent inside one unit render call
    #[inline]
    pub fn record_render(&self, nanos: u64) {
        self.render_min_ns.fetch_min(nanos, Ordering::Relaxed);
        self.render_max_ns.fetch_max(nanos, Ordering::Relaxed);
        self.render_total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.render_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Whole-period processing time against the period's duration.
    ///
    /// Counts an underrun when the period ran over budget.
    #[inline]
    pub fn record_period(&self, elapsed_ns: u64, budget_ns: u64) {
        if budget_ns == 0 {
            return;
        }
        if elapsed_ns > budget_ns {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }

        let load = elapsed_ns as f32 / budget_ns as f32;
        let current = u32_to_f32(self.cpu_load.load(Ordering::Relaxed));
        let smoothed = current * (1.0 - LOAD_SMOOTHING) + load * LOAD_SMOOTHING;
        self.cpu_load.store(f32_to_u32(smoothed), Ordering::Relaxed);
    }

    /// A period that could not be rendered at all
    #[inline]
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_clamped(&self) {
        self.clamped_periods.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cpu_load(&self) -> f32 {
        u32_to_f32(self.cpu_load.load(Ordering::Relaxed))
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        let count = self.render_count.load(Ordering::Relaxed);
        if count == 0 {
            return PerfSnapshot {
                underruns: self.underruns(),
                clamped_periods: self.clamped_periods.load(Ordering::Relaxed),
                cpu_load: self.cpu_load(),
                ..PerfSnapshot::default()
            };
        }

        let to_us = |ns: u64| ns as f64 / 1_000.0;
        PerfSnapshot {
            render_min_us: to_us(self.render_min_ns.load(Ordering::Relaxed)),
            render_avg_us: to_us(self.render_total_ns.load(Ordering::Relaxed)) / count as f64,
            render_max_us: to_us(self.render_max_ns.load(Ordering::Relaxed)),
            render_count: count,
            underruns: self.underruns(),
            clamped_periods: self.clamped_periods.load(Ordering::Relaxed),
            cpu_load: self.cpu_load(),
        }
    }

    pub fn reset(&self) {
        self.render_min_ns.store(u64::MAX, Ordering::Relaxed);
        self.render_max_ns.store(0, Ordering::Relaxed);
        self.render_total_ns.store(0, Ordering::Relaxed);
        self.render_count.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.clamped_periods.store(0, Ordering::Relaxed);
        self.cpu_load.store(f32_to_u32(0.0), Ordering::Relaxed);
    }
}
