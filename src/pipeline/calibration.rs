//! Per-channel calibration polynomials.

use serde::{Deserialize, Serialize};

/// Full-scale code of the default 16-bit converter
pub const DEFAULT_MAX_CODE: u32 = 65_535;

/// Default input range in volts
pub const DEFAULT_RANGE: (f64, f64) = (-10.0, 10.0);

/// Polynomial mapping a raw code to volts:
/// `sum(c[i] * (code - expansion_origin)^i)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Coefficients, lowest order first
    pub coefficients: Vec<f64>,
    pub expansion_origin: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::linear(DEFAULT_RANGE.0, DEFAULT_RANGE.1, DEFAULT_MAX_CODE)
    }
}

impl Calibration {
    pub fn new(coefficients: Vec<f64>, expansion_origin: f64) -> Self {
        Self {
            coefficients,
            expansion_origin,
        }
    }

    /// Linear map of `0..=max_code` onto `min..=max` volts.
    pub fn linear(min: f64, max: f64, max_code: u32) -> Self {
        Self {
            coefficients: vec![min, (max - min) / max_code as f64],
            expansion_origin: 0.0,
        }
    }

    /// Polynomial order; an empty polynomial counts as order 0
    pub fn order(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Evaluate at `code` (Horner).
    pub fn to_physical(&self, code: u32) -> f64 {
        let x = code as f64 - self.expansion_origin;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * x + c)
    }

    /// Inverse of a linear calibration, rounded and clamped to `u32`.
    ///
    /// Returns `None` for higher orders or a zero slope.
    pub fn to_code(&self, volts: f64) -> Option<u32> {
        match self.coefficients.as_slice() {
            [offset, slope] if *slope != 0.0 => {
                let code = (volts - offset) / slope + self.expansion_origin;
                Some(code.round().clamp(0.0, u32::MAX as f64) as u32)
            }
            _ => None,
        }
    }
}
