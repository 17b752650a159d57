// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Audio format specification chosen at session construction.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Immutable audio format parameters for a session.
///
/// The spec is validated once at construction and never changes for the
/// session's lifetime. `bit_depth` is fixed at 32 in the processing path;
/// the field is recorded for external exchange only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioSpec {
    /// Sample rate in Hz, 8000-384000.
    pub sample_rate: f64,
    /// Processing block size in frames, 64-4096.
    pub buffer_size: u32,
    /// Recorded bit depth; the processing path is always 32-bit float.
    pub bit_depth: u32,
    /// Number of output channels.
    pub channel_count: u32,
}

impl AudioSpec {
    pub const MIN_SAMPLE_RATE: f64 = 8_000.0;
    pub const MAX_SAMPLE_RATE: f64 = 384_000.0;
    pub const MIN_BUFFER_SIZE: u32 = 64;
    pub const MAX_BUFFER_SIZE: u32 = 4_096;

    /// Build a validated spec.
    pub fn new(
        sample_rate: f64,
        buffer_size: u32,
        bit_depth: u32,
        channel_count: u32,
    ) -> Result<Self, ConfigurationError> {
        let spec = Self {
            sample_rate,
            buffer_size,
            bit_depth,
            channel_count,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check all field ranges.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(Self::MIN_SAMPLE_RATE..=Self::MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(ConfigurationError::InvalidSampleRate(self.sample_rate));
        }
        if !(Self::MIN_BUFFER_SIZE..=Self::MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigurationError::InvalidBufferSize(self.buffer_size));
        }
        if self.bit_depth != 32 {
            return Err(ConfigurationError::InvalidBitDepth(self.bit_depth));
        }
        if self.channel_count == 0 || self.channel_count > 64 {
            return Err(ConfigurationError::InvalidChannelCount(self.channel_count));
        }
        Ok(())
    }
}

impl Default for AudioSpec {
    /// 48 kHz / 256 frames / 32-bit / stereo.
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            buffer_size: 256,
            bit_depth: 32,
            channel_count: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;

    #[test]
    fn test_default_spec_is_valid() {
        assert!(AudioSpec::default().validate().is_ok());
    }

    #[test]
    fn test_buffer_size_boundaries() {
        assert!(AudioSpec::new(48_000.0, 64, 32, 2).is_ok());
        assert!(AudioSpec::new(48_000.0, 4_096, 32, 2).is_ok());
        assert!(matches!(
            AudioSpec::new(48_000.0, 63, 32, 2),
            Err(ConfigurationError::InvalidBufferSize(63))
        ));
        assert!(matches!(
            AudioSpec::new(48_000.0, 4_097, 32, 2),
            Err(ConfigurationError::InvalidBufferSize(4_097))
        ));
    }

    #[test]
    fn test_sample_rate_boundaries() {
        assert!(AudioSpec::new(8_000.0, 256, 32, 2).is_ok());
        assert!(AudioSpec::new(384_000.0, 256, 32, 2).is_ok());
        assert!(AudioSpec::new(7_999.0, 256, 32, 2).is_err());
        assert!(AudioSpec::new(384_001.0, 256, 32, 2).is_err());
    }

    #[test]
    fn test_bit_depth_fixed_at_32() {
        assert!(matches!(
            AudioSpec::new(48_000.0, 256, 24, 2),
            Err(ConfigurationError::InvalidBitDepth(24))
        ));
    }

    #[test]
    fn test_non_power_of_two_buffer_accepted() {
        // Powers of two are preferred but not required.
        assert!(AudioSpec::new(48_000.0, 100, 32, 2).is_ok());
    }
}
