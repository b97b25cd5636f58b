//! Lock-free control surface
//!
//! The only state shared between the control side (CLI, stdin commands)
//! and the processing side. Requests are flags consumed once with
//! `swap(false)`; values have a single writer. Floats are stored as their
//! bit patterns in `AtomicU64`.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use crate::modulation::MAX_ROUTES;

/// Marker for "nothing published yet"
const NO_VALUE: i32 = i32::MIN;

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

/// Shared between control and processing; wrap in an `Arc`
#[derive(Debug)]
pub struct ControlSurface {
    // Written by control
    enabled: AtomicBool,
    rate_hz: AtomicU64,
    depth: AtomicU64,
    restart_requested: AtomicBool,
    stop_requested: AtomicBool,

    // Written by the engine
    running: AtomicBool,
    bpm: AtomicU64,
    route_values: [AtomicI32; MAX_ROUTES],
    envelope_level: AtomicU64,
    disable_requested: AtomicBool,
}

impl ControlSurface {
    pub fn new(enabled: bool, rate_hz: f64, depth: f64) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            rate_hz: AtomicU64::new(rate_hz.to_bits()),
            depth: AtomicU64::new(depth.to_bits()),
            restart_requested: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            bpm: AtomicU64::new(0f64.to_bits()),
            route_values: std::array::from_fn(|_| AtomicI32::new(NO_VALUE)),
            envelope_level: AtomicU64::new(0f64.to_bits()),
            disable_requested: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_rate_hz(&self, rate_hz: f64) {
        store_f64(&self.rate_hz, rate_hz);
    }

    pub fn rate_hz(&self) -> f64 {
        load_f64(&self.rate_hz)
    }

    pub fn set_depth(&self, depth: f64) {
        store_f64(&self.depth, depth);
    }

    pub fn depth(&self) -> f64 {
        load_f64(&self.depth)
    }

    pub fn request_restart(&self) {
        self.restart_requested.store(true, Ordering::Release);
    }

    /// Consume a pending restart request
    pub fn take_restart(&self) -> bool {
        self.restart_requested.swap(false, Ordering::AcqRel)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Consume a pending stop request
    pub fn take_stop(&self) -> bool {
        self.stop_requested.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn publish_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn publish_bpm(&self, bpm: Option<f64>) {
        store_f64(&self.bpm, bpm.unwrap_or(0.0));
    }

    /// Tempo in use, if any
    pub fn bpm(&self) -> Option<f64> {
        let bpm = load_f64(&self.bpm);
        if bpm > 0.0 {
            Some(bpm)
        } else {
            None
        }
    }

    pub(crate) fn publish_route_value(&self, route: usize, value: i32) {
        if let Some(cell) = self.route_values.get(route) {
            cell.store(value, Ordering::Relaxed);
        }
    }

    /// Last mapped value computed for a route
    pub fn route_value(&self, route: usize) -> Option<i32> {
        let value = self.route_values.get(route)?.load(Ordering::Relaxed);
        if value == NO_VALUE {
            None
        } else {
            Some(value)
        }
    }

    pub(crate) fn publish_envelope_level(&self, level: f64) {
        store_f64(&self.envelope_level, level);
    }

    pub fn envelope_level(&self) -> f64 {
        load_f64(&self.envelope_level)
    }

    /// Engine asks the control side to switch the enable off
    pub(crate) fn request_disable(&self) {
        self.disable_requested.store(true, Ordering::Release);
    }

    /// Consume a pending disable request from the engine
    pub fn take_disable_request(&self) -> bool {
        self.disable_requested.swap(false, Ordering::AcqRel)
    }
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new(false, 1.0, 1.0)
    }
}
