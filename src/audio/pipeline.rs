//! The narrow capability the binding controller drives.
//!
//! The pipeline owns the actual capture/playback and signal processing; the
//! preferences core only tells it what to do. Every call reports failure as
//! a value so that one refused setting never stops the others.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineApplyError;

/// Gain stages exposed to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainStage {
    /// Capture level, percent `[0, 100]`.
    MicrophoneVolume,
    /// Extra capture gain in dB `[0, 20]`.
    MicrophoneBoost,
    /// Playback level, percent `[0, 100]`.
    OutputVolume,
}

impl GainStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GainStage::MicrophoneVolume => "microphone_volume",
            GainStage::MicrophoneBoost => "microphone_boost",
            GainStage::OutputVolume => "output_volume",
        }
    }
}

impl fmt::Display for GainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait AudioPipeline: Send {
    fn set_input_device(&mut self, id: &str) -> Result<(), PipelineApplyError>;
    fn set_output_device(&mut self, id: &str) -> Result<(), PipelineApplyError>;
    fn set_noise_suppression(&mut self, enabled: bool) -> Result<(), PipelineApplyError>;
    /// `fraction` is in `[0, 1]`, not the UI percentage.
    fn set_noise_threshold(&mut self, fraction: f64) -> Result<(), PipelineApplyError>;
    fn set_gain(&mut self, stage: GainStage, value: f64) -> Result<(), PipelineApplyError>;
    fn set_automatic_gain_control(&mut self, enabled: bool) -> Result<(), PipelineApplyError>;
    fn set_echo_cancellation(&mut self, enabled: bool) -> Result<(), PipelineApplyError>;
}

/// Pipeline that accepts everything. Used when no audio backend is compiled in.
#[derive(Debug, Default)]
pub struct NullPipeline;

impl AudioPipeline for NullPipeline {
    fn set_input_device(&mut self, id: &str) -> Result<(), PipelineApplyError> {
        log::debug!("NullPipeline: input device -> {}", id);
        Ok(())
    }

    fn set_output_device(&mut self, id: &str) -> Result<(), PipelineApplyError> {
        log::debug!("NullPipeline: output device -> {}", id);
        Ok(())
    }

    fn set_noise_suppression(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        log::debug!("NullPipeline: noise suppression -> {}", enabled);
        Ok(())
    }

    fn set_noise_threshold(&mut self, fraction: f64) -> Result<(), PipelineApplyError> {
        log::debug!("NullPipeline: noise threshold -> {:.3}", fraction);
        Ok(())
    }

    fn set_gain(&mut self, stage: GainStage, value: f64) -> Result<(), PipelineApplyError> {
        log::debug!("NullPipeline: {} -> {}", stage, value);
        Ok(())
    }

    fn set_automatic_gain_control(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        log::debug!("NullPipeline: AGC -> {}", enabled);
        Ok(())
    }

    fn set_echo_cancellation(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        log::debug!("NullPipeline: echo cancellation -> {}", enabled);
        Ok(())
    }
}
