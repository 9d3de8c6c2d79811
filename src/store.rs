//! Durable preferences.
//!
//! The store speaks to a key/value [`StorageMedium`]. Each field of
//! [`PersistedConfiguration`] lives under its own key as a native TOML
//! value, so a bad value only costs that one field on load. String forms
//! (`microphone_volume = "80"`) are still accepted when reading.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use toml::Value;

use crate::error::StoreError;
use crate::settings::{AudioParameters, Hotkeys, NetworkPreferences, Profile, VoiceQuality};
use crate::validator;

pub mod keys {
    pub const MICROPHONE_VOLUME: &str = "microphone_volume";
    pub const MICROPHONE_BOOST: &str = "microphone_boost";
    pub const OUTPUT_VOLUME: &str = "output_volume";
    pub const NOISE_SUPPRESSION_ENABLED: &str = "noise_suppression_enabled";
    pub const NOISE_THRESHOLD: &str = "noise_threshold";
    pub const AUTOMATIC_GAIN_CONTROL: &str = "automatic_gain_control";
    pub const ECHO_CANCELLATION: &str = "echo_cancellation";
    pub const DEFAULT_PORT: &str = "default_port";
    pub const CONNECTION_TIMEOUT: &str = "connection_timeout_secs";
    pub const AUTO_RECONNECT: &str = "auto_reconnect";
    pub const VOICE_QUALITY: &str = "voice_quality";
    pub const ENABLE_QOS: &str = "enable_qos";
    pub const LAST_INPUT_DEVICE: &str = "last_input_device";
    pub const LAST_OUTPUT_DEVICE: &str = "last_output_device";
    pub const USER_NAME: &str = "user_name";
    pub const USER_AVATAR_PATH: &str = "user_avatar_path";
    pub const PUSH_TO_TALK_KEY: &str = "push_to_talk_key";
    pub const TOGGLE_MUTE_KEY: &str = "toggle_mute_key";
    pub const TOGGLE_DEAFEN_KEY: &str = "toggle_deafen_key";
}

/// Key/value persistence surface. `get` and `set` are each atomic.
pub trait StorageMedium: Send {
    /// Every stored key in one read. A medium that was never written is empty.
    fn entries(&self) -> Result<BTreeMap<String, Value>, StoreError>;

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries()?.remove(key))
    }

    /// `None` removes the key.
    fn set(&mut self, key: &str, value: Option<Value>) -> Result<(), StoreError>;

    /// Apply several keys as one durable update.
    fn set_all(&mut self, entries: &[(&str, Option<Value>)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value.clone())?;
        }
        Ok(())
    }
}

/// In-process medium. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    entries: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Value>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::MediumUnavailable("memory medium lock poisoned".into()))
    }
}

impl StorageMedium for MemoryMedium {
    fn entries(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn set(&mut self, key: &str, value: Option<Value>) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        match value {
            Some(v) => map.insert(key.to_string(), v),
            None => map.remove(key),
        };
        Ok(())
    }
}

/// One flat TOML table on disk. Writes go to a sibling temp file that is
/// then renamed over the target, so readers never see a half-written file.
#[derive(Debug, Clone)]
pub struct TomlFileMedium {
    path: PathBuf,
}

impl TomlFileMedium {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&content)?)
    }

    /// Entries to start a write from. A corrupt file is set aside rather
    /// than blocking every future write.
    fn read_for_update(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        match self.read() {
            Err(StoreError::SerializationFailure(e)) => {
                let backup = self.path.with_extension("toml.backup");
                fs::rename(&self.path, &backup)?;
                log::warn!(
                    "Settings file corrupted: {}. Moved to {:?}, starting fresh.",
                    e,
                    backup
                );
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string(entries)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageMedium for TomlFileMedium {
    fn entries(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        self.read()
    }

    fn set(&mut self, key: &str, value: Option<Value>) -> Result<(), StoreError> {
        self.set_all(&[(key, value)])
    }

    fn set_all(&mut self, entries: &[(&str, Option<Value>)]) -> Result<(), StoreError> {
        let mut map = self.read_for_update()?;
        for (key, value) in entries {
            match value {
                Some(v) => map.insert(key.to_string(), v.clone()),
                None => map.remove(*key),
            };
        }
        self.write(&map)
    }
}

/// Durable projection of everything the session owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfiguration {
    pub microphone_volume: f64,
    pub microphone_boost: f64,
    pub output_volume: f64,
    pub noise_suppression_enabled: bool,
    /// Fraction in `[0, 1]`, not the UI percentage.
    pub noise_threshold: f64,
    pub automatic_gain_control: bool,
    pub echo_cancellation: bool,
    pub default_port: u16,
    pub connection_timeout_secs: f64,
    pub auto_reconnect: bool,
    pub voice_quality: VoiceQuality,
    pub enable_qos: bool,
    pub last_input_device: Option<String>,
    pub last_output_device: Option<String>,
    pub user_name: String,
    pub user_avatar_path: Option<String>,
    pub push_to_talk_key: String,
    pub toggle_mute_key: String,
    pub toggle_deafen_key: String,
}

impl Default for PersistedConfiguration {
    fn default() -> Self {
        let audio = AudioParameters::default();
        let network = NetworkPreferences::default();
        let profile = Profile::default();
        let hotkeys = Hotkeys::default();
        Self {
            microphone_volume: audio.microphone_volume,
            microphone_boost: audio.microphone_boost,
            output_volume: audio.output_volume,
            noise_suppression_enabled: audio.noise_suppression_enabled,
            noise_threshold: validator::percent_to_fraction(audio.noise_threshold),
            automatic_gain_control: audio.automatic_gain_control,
            echo_cancellation: audio.echo_cancellation,
            default_port: network.default_port,
            connection_timeout_secs: network.connection_timeout_secs,
            auto_reconnect: network.auto_reconnect,
            voice_quality: network.voice_quality,
            enable_qos: network.enable_qos,
            last_input_device: None,
            last_output_device: None,
            user_name: profile.user_name,
            user_avatar_path: profile.user_avatar_path,
            push_to_talk_key: hotkeys.push_to_talk,
            toggle_mute_key: hotkeys.toggle_mute,
            toggle_deafen_key: hotkeys.toggle_deafen,
        }
    }
}

impl PersistedConfiguration {
    fn to_entries(&self) -> Vec<(&'static str, Option<Value>)> {
        vec![
            (keys::MICROPHONE_VOLUME, Some(self.microphone_volume.to_stored())),
            (keys::MICROPHONE_BOOST, Some(self.microphone_boost.to_stored())),
            (keys::OUTPUT_VOLUME, Some(self.output_volume.to_stored())),
            (keys::NOISE_SUPPRESSION_ENABLED, Some(self.noise_suppression_enabled.to_stored())),
            (keys::NOISE_THRESHOLD, Some(self.noise_threshold.to_stored())),
            (keys::AUTOMATIC_GAIN_CONTROL, Some(self.automatic_gain_control.to_stored())),
            (keys::ECHO_CANCELLATION, Some(self.echo_cancellation.to_stored())),
            (keys::DEFAULT_PORT, Some(self.default_port.to_stored())),
            (keys::CONNECTION_TIMEOUT, Some(self.connection_timeout_secs.to_stored())),
            (keys::AUTO_RECONNECT, Some(self.auto_reconnect.to_stored())),
            (keys::VOICE_QUALITY, Some(self.voice_quality.to_stored())),
            (keys::ENABLE_QOS, Some(self.enable_qos.to_stored())),
            (keys::LAST_INPUT_DEVICE, self.last_input_device.as_ref().map(StoredValue::to_stored)),
            (keys::LAST_OUTPUT_DEVICE, self.last_output_device.as_ref().map(StoredValue::to_stored)),
            (keys::USER_NAME, Some(self.user_name.to_stored())),
            (keys::USER_AVATAR_PATH, self.user_avatar_path.as_ref().map(StoredValue::to_stored)),
            (keys::PUSH_TO_TALK_KEY, Some(self.push_to_talk_key.to_stored())),
            (keys::TOGGLE_MUTE_KEY, Some(self.toggle_mute_key.to_stored())),
            (keys::TOGGLE_DEAFEN_KEY, Some(self.toggle_deafen_key.to_stored())),
        ]
    }

    fn from_entries(entries: &BTreeMap<String, Value>) -> Self {
        let d = Self::default();
        Self {
            microphone_volume: field(entries, keys::MICROPHONE_VOLUME, d.microphone_volume),
            microphone_boost: field(entries, keys::MICROPHONE_BOOST, d.microphone_boost),
            output_volume: field(entries, keys::OUTPUT_VOLUME, d.output_volume),
            noise_suppression_enabled: field(
                entries,
                keys::NOISE_SUPPRESSION_ENABLED,
                d.noise_suppression_enabled,
            ),
            noise_threshold: field(entries, keys::NOISE_THRESHOLD, d.noise_threshold),
            automatic_gain_control: field(
                entries,
                keys::AUTOMATIC_GAIN_CONTROL,
                d.automatic_gain_control,
            ),
            echo_cancellation: field(entries, keys::ECHO_CANCELLATION, d.echo_cancellation),
            default_port: field(entries, keys::DEFAULT_PORT, d.default_port),
            connection_timeout_secs: field(
                entries,
                keys::CONNECTION_TIMEOUT,
                d.connection_timeout_secs,
            ),
            auto_reconnect: field(entries, keys::AUTO_RECONNECT, d.auto_reconnect),
            voice_quality: field(entries, keys::VOICE_QUALITY, d.voice_quality),
            enable_qos: field(entries, keys::ENABLE_QOS, d.enable_qos),
            last_input_device: optional(entries, keys::LAST_INPUT_DEVICE),
            last_output_device: optional(entries, keys::LAST_OUTPUT_DEVICE),
            user_name: field(entries, keys::USER_NAME, d.user_name),
            user_avatar_path: optional(entries, keys::USER_AVATAR_PATH),
            push_to_talk_key: field(entries, keys::PUSH_TO_TALK_KEY, d.push_to_talk_key),
            toggle_mute_key: field(entries, keys::TOGGLE_MUTE_KEY, d.toggle_mute_key),
            toggle_deafen_key: field(entries, keys::TOGGLE_DEAFEN_KEY, d.toggle_deafen_key),
        }
    }
}

/// One persisted field as a TOML value. Reading also takes the string
/// form, which hand-edited files and older versions produce.
trait StoredValue: Sized {
    fn from_stored(value: &Value) -> Option<Self>;
    fn to_stored(&self) -> Value;
}

fn parse_str<T: FromStr>(value: &Value) -> Option<T> {
    value.as_str().and_then(|s| s.trim().parse().ok())
}

impl StoredValue for f64 {
    fn from_stored(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => parse_str(value),
        }
    }

    fn to_stored(&self) -> Value {
        Value::Float(*self)
    }
}

impl StoredValue for bool {
    fn from_stored(value: &Value) -> Option<Self> {
        value.as_bool().or_else(|| parse_str(value))
    }

    fn to_stored(&self) -> Value {
        Value::Boolean(*self)
    }
}

impl StoredValue for u16 {
    fn from_stored(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => u16::try_from(*i).ok(),
            _ => parse_str(value),
        }
    }

    fn to_stored(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl StoredValue for VoiceQuality {
    fn from_stored(value: &Value) -> Option<Self> {
        parse_str(value)
    }

    fn to_stored(&self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

impl StoredValue for String {
    fn from_stored(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => Some(value.to_string()),
            _ => None,
        }
    }

    fn to_stored(&self) -> Value {
        Value::String(self.clone())
    }
}

fn field<T: StoredValue>(entries: &BTreeMap<String, Value>, key: &str, default: T) -> T {
    match entries.get(key) {
        None => default,
        Some(raw) => T::from_stored(raw).unwrap_or_else(|| {
            log::warn!("Ignoring unreadable setting {} = {}, using default", key, raw);
            default
        }),
    }
}

fn optional<T: StoredValue>(entries: &BTreeMap<String, Value>, key: &str) -> Option<T> {
    let raw = entries.get(key)?;
    let value = T::from_stored(raw);
    if value.is_none() {
        log::warn!("Ignoring unreadable setting {} = {}", key, raw);
    }
    value
}

pub struct PreferenceStore {
    medium: Box<dyn StorageMedium>,
}

impl PreferenceStore {
    pub fn new(medium: Box<dyn StorageMedium>) -> Self {
        Self { medium }
    }

    /// Never fails. Missing keys take their defaults; an unreadable medium
    /// yields the built-in defaults wholesale.
    pub fn load(&self) -> PersistedConfiguration {
        match self.medium.entries() {
            Ok(entries) => PersistedConfiguration::from_entries(&entries),
            Err(e) => {
                log::warn!("Failed to read settings: {}. Using defaults.", e);
                PersistedConfiguration::default()
            }
        }
    }

    /// Write-through: returns only once the medium has accepted the record.
    pub fn save(&mut self, config: &PersistedConfiguration) -> Result<(), StoreError> {
        self.medium.set_all(&config.to_entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_medium_loads_defaults() {
        let store = PreferenceStore::new(Box::new(MemoryMedium::new()));
        assert_eq!(store.load(), PersistedConfiguration::default());
    }

    #[test]
    fn unreadable_field_falls_back_individually() {
        let mut medium = MemoryMedium::new();
        medium.set(keys::MICROPHONE_VOLUME, Some("loud".into())).unwrap();
        medium.set(keys::OUTPUT_VOLUME, Some("80".into())).unwrap();
        medium.set(keys::VOICE_QUALITY, Some("Ultra".into())).unwrap();

        let store = PreferenceStore::new(Box::new(medium));
        let config = store.load();
        assert_eq!(config.microphone_volume, 50.0);
        assert_eq!(config.output_volume, 80.0);
        assert_eq!(config.voice_quality, VoiceQuality::Ultra);
    }

    #[test]
    fn none_removes_optional_keys() {
        let medium = MemoryMedium::new();
        let mut store = PreferenceStore::new(Box::new(medium.clone()));

        let mut config = PersistedConfiguration::default();
        config.last_input_device = Some("hw:1,0".into());
        store.save(&config).unwrap();
        assert_eq!(medium.get(keys::LAST_INPUT_DEVICE).unwrap(), Some(Value::from("hw:1,0")));

        config.last_input_device = None;
        store.save(&config).unwrap();
        assert_eq!(medium.get(keys::LAST_INPUT_DEVICE).unwrap(), None);
    }

    #[test]
    fn file_save_of_load_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut store = PreferenceStore::new(Box::new(TomlFileMedium::new(&path)));

        let mut config = PersistedConfiguration::default();
        config.noise_threshold = validator::percent_to_fraction(33.3);
        config.microphone_boost = 7.25;
        config.user_avatar_path = Some("/tmp/me.png".into());
        store.save(&config).unwrap();
        let first = fs::read(&path).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, config);
        store.save(&loaded).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_file_loads_defaults_and_is_replaced_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        let mut store = PreferenceStore::new(Box::new(TomlFileMedium::new(&path)));
        assert_eq!(store.load(), PersistedConfiguration::default());

        store.save(&PersistedConfiguration::default()).unwrap();
        assert!(path.with_extension("toml.backup").exists());
        assert_eq!(store.load(), PersistedConfiguration::default());
    }

    #[test]
    fn native_toml_values_load_per_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "microphone_volume = 80\nuser_name = \"Ada\"\ndefault_port = 9000\n\
             echo_cancellation = false\noutput_volume = [1, 2]\n",
        )
        .unwrap();

        let store = PreferenceStore::new(Box::new(TomlFileMedium::new(&path)));
        let config = store.load();

        assert_eq!(config.microphone_volume, 80.0);
        assert_eq!(config.user_name, "Ada");
        assert_eq!(config.default_port, 9000);
        assert!(!config.echo_cancellation);
        assert_eq!(config.output_volume, 50.0);
        assert!(!path.with_extension("toml.backup").exists());
    }

    #[test]
    fn file_is_written_with_native_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let mut store = PreferenceStore::new(Box::new(TomlFileMedium::new(&path)));

        store.save(&PersistedConfiguration::default()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("microphone_volume = 50.0"), "{text}");
        assert!(text.contains("default_port = 7777"), "{text}");
        assert!(text.contains("echo_cancellation = true"), "{text}");
        assert!(text.contains("voice_quality = \"high\""), "{text}");
    }

    #[test]
    fn unwritable_location_reports_store_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "").unwrap();

        let mut store =
            PreferenceStore::new(Box::new(TomlFileMedium::new(blocker.join("settings.toml"))));
        let err = store.save(&PersistedConfiguration::default()).unwrap_err();
        assert!(matches!(err, StoreError::MediumUnavailable(_)), "got {err:?}");
    }
}
