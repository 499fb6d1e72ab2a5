//! Linear conversions between raw converter codes and physical units
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.

/// The transfer function `physical = slope * code + offset` of an ADC or DAC channel.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinearTransformation {
    /// Physical units per code.
    slope: f32,
    /// Physical value of the zero code.
    offset: f32,
}

impl LinearTransformation {
    pub const fn new(slope: f32, offset: f32) -> Self {
        Self { slope, offset }
    }

    /// Construct the transfer function of a converter spanning `scale` units over its codes.
    ///
    /// # Args
    /// * `scale` - The physical span of the full code range.
    /// * `range` - The number of codes of the converter.
    /// * `offset` - The physical value of a zero code.
    pub fn full_scale(scale: f32, range: f32, offset: f32) -> Self {
        Self::new(scale / range, offset)
    }

    /// The physical value of a monitored code.
    pub fn physical(&self, code: f32) -> f32 {
        code * self.slope + self.offset
    }

    /// The unclamped code that sets a physical value.
    pub fn code(&self, physical: f32) -> f32 {
        (physical - self.offset) / self.slope
    }
}
