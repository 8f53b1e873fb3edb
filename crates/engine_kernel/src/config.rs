//! Kernel configuration.

use std::time::Duration;

use crate::error::KernelError;

/// Configuration for the kernel frame loop.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Target frames per second for [`EcsManager::run`](crate::EcsManager::run).
    pub frame_rate: f64,
    /// Maximum number of frames to run (0 = unlimited).
    pub max_frames: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            max_frames: 0,
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the target frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Stop the loop after `max_frames` frames.
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// The wall-clock budget of one frame.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTickRate`] unless the frame rate is a
    /// positive finite number.
    pub fn frame_period(&self) -> Result<Duration, KernelError> {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            Ok(Duration::from_secs_f64(1.0 / self.frame_rate))
        } else {
            Err(KernelError::InvalidTickRate(self.frame_rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_period() {
        let config = KernelConfig::new().with_frame_rate(4.0);
        assert_eq!(config.frame_period().unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_frame_rate() {
        assert!(KernelConfig::new().with_frame_rate(0.0).frame_period().is_err());
        assert!(KernelConfig::new().with_frame_rate(f64::NAN).frame_period().is_err());
        assert!(KernelConfig::new().with_frame_rate(f64::INFINITY).frame_period().is_err());
    }
}
