//! Live configuration records.
//!
//! Constructors and `Default` only ever produce in-range values; mutation
//! goes through [`ConfigurationSession`](crate::session::ConfigurationSession),
//! which clamps first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::DeviceDescriptor;
use crate::validator::{self, DEFAULT_PORT, DEFAULT_USER_NAME};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParameters {
    pub microphone_volume: f64,
    pub microphone_boost: f64,
    pub output_volume: f64,
    pub noise_suppression_enabled: bool,
    /// UI percentage; the pipeline and the store see `noise_threshold / 100`.
    pub noise_threshold: f64,
    pub automatic_gain_control: bool,
    pub echo_cancellation: bool,
}

impl Default for AudioParameters {
    fn default() -> Self {
        Self {
            microphone_volume: validator::MICROPHONE_VOLUME.default,
            microphone_boost: validator::MICROPHONE_BOOST.default,
            output_volume: validator::OUTPUT_VOLUME.default,
            noise_suppression_enabled: true,
            noise_threshold: validator::NOISE_THRESHOLD.default,
            automatic_gain_control: true,
            echo_cancellation: true,
        }
    }
}

impl AudioParameters {
    /// Copy with every numeric field pulled into range.
    pub fn clamped(&self) -> Self {
        Self {
            microphone_volume: validator::clamp_microphone_volume(self.microphone_volume),
            microphone_boost: validator::clamp_microphone_boost(self.microphone_boost),
            output_volume: validator::clamp_output_volume(self.output_volume),
            noise_threshold: validator::clamp_noise_threshold(self.noise_threshold),
            ..self.clone()
        }
    }
}

/// Codec presets offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceQuality {
    Low,
    Medium,
    #[default]
    High,
    Ultra,
}

impl VoiceQuality {
    pub fn sample_rate(&self) -> u32 {
        match self {
            VoiceQuality::Low => 8_000,
            VoiceQuality::Medium | VoiceQuality::High => 16_000,
            VoiceQuality::Ultra => 48_000,
        }
    }

    /// Target bitrate in bits/s.
    pub fn bitrate(&self) -> u32 {
        match self {
            VoiceQuality::Low => 16_000,
            VoiceQuality::Medium => 24_000,
            VoiceQuality::High => 32_000,
            VoiceQuality::Ultra => 64_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceQuality::Low => "low",
            VoiceQuality::Medium => "medium",
            VoiceQuality::High => "high",
            VoiceQuality::Ultra => "ultra",
        }
    }
}

impl fmt::Display for VoiceQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}kHz, {}kbps)",
            self.as_str(),
            self.sample_rate() / 1000,
            self.bitrate() / 1000
        )
    }
}

impl FromStr for VoiceQuality {
    type Err = String;

    /// Accepts the short name, case-insensitively, optionally followed by
    /// the descriptive suffix produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
        match word.as_str() {
            "low" => Ok(VoiceQuality::Low),
            "medium" => Ok(VoiceQuality::Medium),
            "high" => Ok(VoiceQuality::High),
            "ultra" => Ok(VoiceQuality::Ultra),
            _ => Err(format!("unknown voice quality: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPreferences {
    pub default_port: u16,
    pub connection_timeout_secs: f64,
    pub auto_reconnect: bool,
    pub voice_quality: VoiceQuality,
    pub enable_qos: bool,
}

impl Default for NetworkPreferences {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            connection_timeout_secs: validator::CONNECTION_TIMEOUT.default,
            auto_reconnect: true,
            voice_quality: VoiceQuality::default(),
            enable_qos: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    pub selected_input: Option<DeviceDescriptor>,
    pub selected_output: Option<DeviceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_name: String,
    pub user_avatar_path: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            user_name: DEFAULT_USER_NAME.to_string(),
            user_avatar_path: None,
        }
    }
}

pub const DEFAULT_PUSH_TO_TALK: &str = "Ctrl + V";
pub const DEFAULT_TOGGLE_MUTE: &str = "Ctrl + M";
pub const DEFAULT_TOGGLE_DEAFEN: &str = "Ctrl + D";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotkeys {
    pub push_to_talk: String,
    pub toggle_mute: String,
    pub toggle_deafen: String,
}

impl Default for Hotkeys {
    fn default() -> Self {
        Self {
            push_to_talk: DEFAULT_PUSH_TO_TALK.to_string(),
            toggle_mute: DEFAULT_TOGGLE_MUTE.to_string(),
            toggle_deafen: DEFAULT_TOGGLE_DEAFEN.to_string(),
        }
    }
}
