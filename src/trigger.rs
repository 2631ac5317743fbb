//! Trigger (C10): threshold/hysteresis primitives used by external monitors
//! to decide when to invoke a re-optimization round. See `SPEC_FULL.md §4.10`.

use parking_lot::Mutex;

/// Which side of the threshold band a [`Trigger`] watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// `check(v) = v > high * (1 - margin)`.
    OverThreshold,
    /// `check(v) = v < high * (1 - margin)`.
    UnderThreshold,
}

/// A threshold/hysteresis primitive: high/low watermarks, a margin
/// `m ∈ [0, 1)`, an armed flag, and an action callback fired on `fire`.
pub struct Trigger {
    kind: TriggerKind,
    threshold_high: u32,
    threshold_low: u32,
    margin: f32,
    armed: Mutex<bool>,
    action: Mutex<Option<Box<dyn FnMut() + Send>>>,
}

impl Trigger {
    pub fn new(kind: TriggerKind, threshold_high: u32, threshold_low: u32, margin: f32) -> Self {
        Trigger {
            kind,
            threshold_high,
            threshold_low,
            margin,
            armed: Mutex::new(true),
            action: Mutex::new(None),
        }
    }

    pub fn threshold_high(&self) -> u32 {
        self.threshold_high
    }

    pub fn threshold_low(&self) -> u32 {
        self.threshold_low
    }

    pub fn is_armed(&self) -> bool {
        *self.armed.lock()
    }

    pub fn set_armed(&self, armed: bool) {
        *self.armed.lock() = armed;
    }

    pub fn set_action(&self, action: impl FnMut() + Send + 'static) {
        *self.action.lock() = Some(Box::new(action));
    }

    /// `check(v)` per `§4.10`, always against `threshold_high` regardless of
    /// kind — this mirrors the reference daemon's own (intentionally
    /// asymmetric) formula rather than a naive high/low split.
    pub fn check(&self, curr_value: f32) -> bool {
        let thres = self.threshold_high as f32 * (1.0 - self.margin);
        match self.kind {
            TriggerKind::OverThreshold => curr_value > thres,
            TriggerKind::UnderThreshold => curr_value < thres,
        }
    }

    /// If armed and `check(curr_value)` holds, runs the action and disarms
    /// (so a monitor loop doesn't re-fire every sample until it re-arms
    /// once the value crosses back).
    pub fn fire_if_due(&self, curr_value: f32) -> bool {
        if !self.is_armed() || !self.check(curr_value) {
            return false;
        }
        self.set_armed(false);
        if let Some(action) = self.action.lock().as_mut() {
            action();
        }
        true
    }
}

/// Dispenses pre-configured [`Trigger`] instances by tag (`§4.10`).
pub struct TriggerFactory;

impl TriggerFactory {
    pub fn cpu_high() -> Trigger {
        Trigger::new(TriggerKind::OverThreshold, 90, 70, 0.05)
    }

    pub fn cpu_low() -> Trigger {
        Trigger::new(TriggerKind::UnderThreshold, 30, 10, 0.05)
    }

    pub fn memory_high() -> Trigger {
        Trigger::new(TriggerKind::OverThreshold, 85, 60, 0.1)
    }

    /// Falls back to `cpu_high` for an unrecognized tag, matching the
    /// original factory's default-to-`OverThresholdTrigger` behavior.
    pub fn by_tag(tag: &str) -> Trigger {
        match tag {
            "cpu_high" => Self::cpu_high(),
            "cpu_low" => Self::cpu_low(),
            "memory_high" => Self::memory_high(),
            _ => Self::cpu_high(),
        }
    }
}
