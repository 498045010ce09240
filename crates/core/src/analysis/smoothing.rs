use serde::{Deserialize, Serialize};

use crate::{LightshowError, Result};

/// Attack/release parameters of an asymmetric exponential smoother.
///
/// The attack branch is taken whenever the incoming value is at or above the
/// current smoothed value, the release branch otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Smoothing {
    /// Per-call blend factors in [0, 1]. Tuned against a constant callback
    /// cadence, so the effective time constant depends on the frame rate.
    Coefficients { attack: f32, release: f32 },
    /// Time constants in seconds. The blend factor is derived from the elapsed
    /// time, which keeps the response independent of the callback cadence.
    /// A constant of zero snaps straight to the target.
    TimeConstants { attack_tau: f32, release_tau: f32 },
}

impl Smoothing {
    /// Advances `previous` towards `value` over `dt` seconds.
    pub fn step(&self, value: f32, previous: f32, dt: f32) -> f32 {
        let rising = value >= previous;
        let alpha = match *self {
            Smoothing::Coefficients { attack, release } => {
                let coefficient = if rising { attack } else { release };
                clamp_unit(coefficient)
            }
            Smoothing::TimeConstants {
                attack_tau,
                release_tau,
            } => {
                let tau = if rising { attack_tau } else { release_tau };
                alpha_from_tau(tau, dt)
            }
        };

        alpha * value + (1.0 - alpha) * previous
    }

    pub(crate) fn validate(&self, field: &str) -> Result<()> {
        let (a, b) = match *self {
            Smoothing::Coefficients { attack, release } => (attack, release),
            Smoothing::TimeConstants {
                attack_tau,
                release_tau,
            } => (attack_tau, release_tau),
        };
        if !a.is_finite() || !b.is_finite() || a < 0.0 || b < 0.0 {
            return Err(LightshowError::invalid(format!(
                "{field} parameters must be finite and non-negative (got {a}, {b})"
            )));
        }
        Ok(())
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn alpha_from_tau(tau: f32, dt: f32) -> f32 {
    let tau = tau.max(0.0);
    if tau <= f32::EPSILON {
        return 1.0;
    }
    let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
    1.0 - (-dt / tau).exp()
}

/// Stateful wrapper that remembers the last smoothed value.
#[derive(Debug, Clone)]
pub struct DualRateSmoother {
    smoothing: Smoothing,
    value: f32,
}

impl DualRateSmoother {
    pub fn new(smoothing: Smoothing) -> Self {
        Self {
            smoothing,
            value: 0.0,
        }
    }

    /// Feeds a new sample and returns the updated smoothed value. Non-finite
    /// samples are ignored so the state always stays finite.
    pub fn update(&mut self, value: f32, dt: f32) -> f32 {
        if value.is_finite() {
            self.value = self.smoothing.step(value, self.value, dt);
        }
        self.value
    }

    /// Returns the current smoothed value.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Returns the attack/release parameters.
    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }
}
