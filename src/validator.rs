//! Clamp and normalize every user-tunable value.
//!
//! All functions here are pure and total. Out-of-range input is pulled to
//! the nearest bound, NaN falls back to the field default, and text fields
//! are normalized rather than refused. The [`strict`] module offers the
//! rejecting counterpart for callers that prefer an error.

use thiserror::Error;

/// Closed range with the value used when input is not a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl Range {
    pub const fn new(name: &'static str, min: f64, max: f64, default: f64) -> Self {
        Self { name, min, max, default }
    }

    /// Clamp into `[min, max]`. NaN becomes `default`, infinities the nearest bound.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

pub const MICROPHONE_VOLUME: Range = Range::new("microphone_volume", 0.0, 100.0, 50.0);
pub const MICROPHONE_BOOST: Range = Range::new("microphone_boost", 0.0, 20.0, 0.0);
pub const OUTPUT_VOLUME: Range = Range::new("output_volume", 0.0, 100.0, 50.0);
pub const NOISE_THRESHOLD: Range = Range::new("noise_threshold", 0.0, 100.0, 30.0);
pub const CONNECTION_TIMEOUT: Range = Range::new("connection_timeout_secs", 5.0, 300.0, 30.0);

pub const PORT_MIN: u16 = 1024;
pub const PORT_MAX: u16 = 65535;
pub const DEFAULT_PORT: u16 = 7777;

pub const DEFAULT_USER_NAME: &str = "User";
pub const MAX_USER_NAME_CHARS: usize = 64;

/// Resolution of the persisted noise threshold fraction.
const FRACTION_STEPS: f64 = 1_000_000.0;
const PERCENT_STEPS: f64 = FRACTION_STEPS / 100.0;

pub fn clamp_microphone_volume(value: f64) -> f64 {
    MICROPHONE_VOLUME.clamp(value)
}

pub fn clamp_microphone_boost(value: f64) -> f64 {
    MICROPHONE_BOOST.clamp(value)
}

pub fn clamp_output_volume(value: f64) -> f64 {
    OUTPUT_VOLUME.clamp(value)
}

pub fn clamp_noise_threshold(value: f64) -> f64 {
    NOISE_THRESHOLD.clamp(value)
}

pub fn clamp_connection_timeout(value: f64) -> f64 {
    CONNECTION_TIMEOUT.clamp(value)
}

pub fn clamp_port(value: i64) -> u16 {
    value.clamp(PORT_MIN as i64, PORT_MAX as i64) as u16
}

/// UI percentage to the fraction handed to the pipeline and the store.
///
/// The fraction is quantized so that `percent_to_fraction(fraction_to_percent(f)) == f`
/// for every stored `f`, which keeps repeated load/save cycles stable.
pub fn percent_to_fraction(percent: f64) -> f64 {
    let fraction = clamp_noise_threshold(percent) / 100.0;
    (fraction * FRACTION_STEPS).round() / FRACTION_STEPS
}

/// Stored fraction back to the UI percentage.
pub fn fraction_to_percent(fraction: f64) -> f64 {
    let fraction = if fraction.is_nan() {
        NOISE_THRESHOLD.default / 100.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    let percent = (fraction * 100.0 * PERCENT_STEPS).round() / PERCENT_STEPS;
    clamp_noise_threshold(percent)
}

/// Trim surrounding whitespace, cap the length, and fall back to
/// [`DEFAULT_USER_NAME`] when nothing is left.
pub fn normalize_user_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return DEFAULT_USER_NAME.to_string();
    }
    trimmed.chars().take(MAX_USER_NAME_CHARS).collect::<String>().trim_end().to_string()
}

/// Blank paths mean "no avatar". Whether the file is a readable image is
/// checked by the picker before it gets here.
pub fn normalize_avatar_path(path: Option<&str>) -> Option<String> {
    path.map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

const MODIFIERS: [&str; 4] = ["Ctrl", "Shift", "Alt", "Win"];

fn canonical_modifier(part: &str) -> Option<&'static str> {
    match part.to_ascii_lowercase().as_str() {
        "ctrl" | "control" => Some("Ctrl"),
        "shift" => Some("Shift"),
        "alt" | "option" => Some("Alt"),
        "win" | "super" | "meta" | "cmd" => Some("Win"),
        _ => None,
    }
}

fn canonical_key(part: &str) -> Option<String> {
    let mut chars = part.chars();
    let first = chars.next()?;
    if chars.as_str().is_empty() {
        return first.is_ascii_graphic().then(|| first.to_ascii_uppercase().to_string());
    }
    if !part.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let mut key = first.to_ascii_uppercase().to_string();
    key.push_str(&part[1..].to_ascii_lowercase());
    Some(key)
}

/// Canonical form `"Ctrl + Shift + X"`: modifiers in fixed order, exactly
/// one non-modifier key. Anything else yields `default`.
pub fn normalize_hotkey(binding: &str, default: &str) -> String {
    let mut modifiers: Vec<&'static str> = Vec::new();
    let mut key: Option<String> = None;

    for part in binding.split('+').map(str::trim) {
        if part.is_empty() {
            return default.to_string();
        }
        if let Some(m) = canonical_modifier(part) {
            if !modifiers.contains(&m) {
                modifiers.push(m);
            }
            continue;
        }
        match (key.is_some(), canonical_key(part)) {
            (false, Some(k)) => key = Some(k),
            _ => return default.to_string(),
        }
    }

    let Some(key) = key else {
        return default.to_string();
    };

    let mut parts: Vec<String> = MODIFIERS
        .iter()
        .filter(|m| modifiers.contains(m))
        .map(|m| m.to_string())
        .collect();
    parts.push(key);
    parts.join(" + ")
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} value {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
}

/// Rejecting counterparts of the clamp functions.
pub mod strict {
    use super::*;

    pub fn check(range: &Range, value: f64) -> Result<f64, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite { field: range.name });
        }
        if !range.contains(value) {
            return Err(ValidationError::OutOfRange {
                field: range.name,
                value,
                min: range.min,
                max: range.max,
            });
        }
        Ok(value)
    }

    pub fn microphone_volume(value: f64) -> Result<f64, ValidationError> {
        check(&MICROPHONE_VOLUME, value)
    }

    pub fn microphone_boost(value: f64) -> Result<f64, ValidationError> {
        check(&MICROPHONE_BOOST, value)
    }

    pub fn output_volume(value: f64) -> Result<f64, ValidationError> {
        check(&OUTPUT_VOLUME, value)
    }

    pub fn noise_threshold(value: f64) -> Result<f64, ValidationError> {
        check(&NOISE_THRESHOLD, value)
    }

    pub fn connection_timeout(value: f64) -> Result<f64, ValidationError> {
        check(&CONNECTION_TIMEOUT, value)
    }

    pub fn port(value: i64) -> Result<u16, ValidationError> {
        if (PORT_MIN as i64..=PORT_MAX as i64).contains(&value) {
            Ok(value as u16)
        } else {
            Err(ValidationError::OutOfRange {
                field: "default_port",
                value: value as f64,
                min: PORT_MIN as f64,
                max: PORT_MAX as f64,
            })
        }
    }
}
