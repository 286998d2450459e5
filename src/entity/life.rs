//! Usage-weighted life budget
//!
//! Data operations extend an entity's remaining life. Small payloads earn a
//! larger bonus than large ones, so small hot entities outlive large cold
//! ones. The bonus of an "after" event is computed from the budget captured
//! when the matching "before" event fired.

use crate::hooks::HookEvent;
use serde_json::Value;

/// Initial life, in life units, of a freshly constructed entity
pub const DEFAULT_LIFE: f64 = 10.0;

/// Upper bound on a life budget, in life units
pub const DEFAULT_MAX_LIFE: f64 = 1_000_000.0;

/// Size of a payload as used by the life formulas; never below 1
pub fn payload_size(value: &Value) -> f64 {
    let size = match value {
        Value::String(s) => s.len(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => 1,
    };
    size.max(1) as f64
}

/// Remaining life of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct LifeBudget {
    life: f64,
    max: f64,
    // Budget when the in-flight operation's "before" event fired
    base: Option<f64>,
}

impl LifeBudget {
    pub fn new(initial: f64, max: f64) -> Self {
        Self {
            life: initial,
            max,
            base: None,
        }
    }

    pub fn life(&self) -> f64 {
        self.life
    }

    /// Life bonus earned by an event, or `None` for events that do not
    /// affect life
    pub fn bonus(&mut self, event: &HookEvent) -> Option<f64> {
        match event {
            HookEvent::BeforeGetData { .. } => {
                self.base = Some(self.life);
                Some(self.life)
            }
            HookEvent::AfterGetData(data) => Some(self.take_base() / payload_size(data)),
            HookEvent::BeforeSetData(data) => {
                self.base = Some(self.life);
                Some(self.life / payload_size(data))
            }
            HookEvent::AfterSetData(_) => Some(self.take_base()),
            HookEvent::BeforeCreate(data) => {
                self.base = Some(self.life);
                Some(self.life * 2.0 / payload_size(data))
            }
            HookEvent::AfterCreate(_) => Some(self.take_base()),
            _ => None,
        }
    }

    /// Add `by` to the budget, capped at the maximum; returns the new life
    pub fn extend(&mut self, by: f64) -> f64 {
        self.life = (self.life + by).min(self.max);
        self.life
    }

    /// Whether the budget no longer describes a positive duration
    pub fn is_exhausted(&self) -> bool {
        !(self.life > 0.0 && self.life.is_finite())
    }

    fn take_base(&mut self) -> f64 {
        self.base.take().unwrap_or(self.life)
    }
}

impl Default for LifeBudget {
    fn default() -> Self {
        Self::new(DEFAULT_LIFE, DEFAULT_MAX_LIFE)
    }
}
