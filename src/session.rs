//! The configuration session: single owner of every live setting.
//!
//! All edits, from the GUI or from restore at startup, go through the same
//! setters. Each one clamps, returns early when nothing changed, updates
//! memory, hands the change to the binding controller (pipeline and/or
//! store), and finally tells observers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::{AudioPipeline, DeviceDescriptor, DeviceRegistry, DeviceSnapshot, Direction};
use crate::binding::{AudioBindingController, BindingState};
use crate::error::{BindingError, SessionError, StoreError};
use crate::settings::{
    AudioParameters, DeviceSelection, Hotkeys, NetworkPreferences, Profile, VoiceQuality,
    DEFAULT_PUSH_TO_TALK, DEFAULT_TOGGLE_DEAFEN, DEFAULT_TOGGLE_MUTE,
};
use crate::store::{PersistedConfiguration, PreferenceStore};
use crate::validator;

/// Every observable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    MicrophoneVolume,
    MicrophoneBoost,
    OutputVolume,
    NoiseSuppressionEnabled,
    NoiseThreshold,
    AutomaticGainControl,
    EchoCancellation,
    DefaultPort,
    ConnectionTimeoutSecs,
    AutoReconnect,
    VoiceQuality,
    EnableQos,
    SelectedInput,
    SelectedOutput,
    UserName,
    UserAvatarPath,
    PushToTalkKey,
    ToggleMuteKey,
    ToggleDeafenKey,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Number(f64),
    Port(u16),
    Flag(bool),
    Quality(VoiceQuality),
    Text(String),
    OptionalText(Option<String>),
    Device(Option<DeviceDescriptor>),
}

/// Sent to observers after a value has been stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingChange {
    pub field: Field,
    pub value: SettingValue,
}

/// What happened during [`ConfigurationSession::load`]. The session is
/// usable either way; `issues` lists what could not be restored as-is.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub snapshot: DeviceSnapshot,
    pub issues: Vec<SessionError>,
}

pub struct ConfigurationSession {
    registry: DeviceRegistry,
    controller: AudioBindingController,
    audio: AudioParameters,
    network: NetworkPreferences,
    selection: DeviceSelection,
    profile: Profile,
    hotkeys: Hotkeys,
    observers: Vec<mpsc::UnboundedSender<SettingChange>>,
    /// Set while `load` replays stored values or `refresh_devices`
    /// reconciles; suppresses persistence and pipeline pushes of parameters.
    restoring: bool,
    /// Preferred device ids the pipeline refused to open. They stay the
    /// stored preference while a fallback device is in use.
    held_input: Option<String>,
    held_output: Option<String>,
    /// The last persist failed; memory is ahead of the store.
    dirty: bool,
}

impl ConfigurationSession {
    pub fn new(
        registry: DeviceRegistry,
        pipeline: Box<dyn AudioPipeline>,
        store: PreferenceStore,
    ) -> Self {
        Self {
            registry,
            controller: AudioBindingController::new(pipeline, store),
            audio: AudioParameters::default(),
            network: NetworkPreferences::default(),
            selection: DeviceSelection::default(),
            profile: Profile::default(),
            hotkeys: Hotkeys::default(),
            observers: Vec::new(),
            restoring: false,
            held_input: None,
            held_output: None,
            dirty: false,
        }
    }

    /// Register for change notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SettingChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    // ---- startup ----

    /// Enumerate devices, read the store, and replay every stored value
    /// through the regular setters. A stored device that is no longer
    /// present falls back to the first enumerated one; one the pipeline
    /// refuses is kept as the stored preference while another device is
    /// used. The parameters reach the pipeline in a single apply. If the
    /// reconciled configuration differs from what was stored, it is saved
    /// once.
    pub fn load(&mut self) -> LoadOutcome {
        let snapshot = self.registry.refresh();
        let stored = self.controller.load();
        let mut issues = Vec::new();

        self.restoring = true;

        self.reconcile(Direction::Input, stored.last_input_device.as_deref(), &mut issues);
        self.reconcile(Direction::Output, stored.last_output_device.as_deref(), &mut issues);

        let results = [
            self.set_microphone_volume(stored.microphone_volume),
            self.set_microphone_boost(stored.microphone_boost),
            self.set_output_volume(stored.output_volume),
            self.set_noise_suppression_enabled(stored.noise_suppression_enabled),
            self.set_noise_threshold(validator::fraction_to_percent(stored.noise_threshold)),
            self.set_automatic_gain_control(stored.automatic_gain_control),
            self.set_echo_cancellation(stored.echo_cancellation),
            self.set_default_port(i64::from(stored.default_port)),
            self.set_connection_timeout(stored.connection_timeout_secs),
            self.set_auto_reconnect(stored.auto_reconnect),
            self.set_voice_quality(stored.voice_quality),
            self.set_enable_qos(stored.enable_qos),
            self.set_user_name(&stored.user_name),
            self.set_user_avatar_path(stored.user_avatar_path.as_deref()),
            self.set_push_to_talk_key(&stored.push_to_talk_key),
            self.set_toggle_mute_key(&stored.toggle_mute_key),
            self.set_toggle_deafen_key(&stored.toggle_deafen_key),
        ];
        issues.extend(results.into_iter().filter_map(Result::err));

        let report = self.controller.apply_parameters(&self.audio);
        issues.extend(report.failures.into_iter().map(SessionError::from));

        self.restoring = false;

        if self.projection() != stored {
            log::info!("Stored settings were normalized; saving reconciled configuration");
            if let Err(e) = self.persist() {
                issues.push(e.into());
            }
        }

        log::info!("Settings restored with {} issue(s)", issues.len());
        LoadOutcome { snapshot, issues }
    }

    /// Re-enumerate devices. A selection that disappeared is replaced the
    /// same way as at startup, and a held preference is retried.
    pub fn refresh_devices(&mut self) -> (DeviceSnapshot, Vec<SessionError>) {
        let snapshot = self.registry.refresh();
        let before = self.projection();
        let mut issues = Vec::new();

        self.restoring = true;
        for direction in [Direction::Input, Direction::Output] {
            let held = self.held(direction).map(str::to_string);
            if held.is_none() && self.selected(direction).is_some_and(|d| snapshot.contains(d)) {
                continue;
            }
            let preferred = held.or_else(|| self.selected(direction).map(|d| d.id.clone()));
            self.reconcile(direction, preferred.as_deref(), &mut issues);
        }
        self.restoring = false;

        if self.projection() != before {
            if let Err(e) = self.persist() {
                issues.push(e.into());
            }
        }
        (snapshot, issues)
    }

    /// Bind the preferred device if present, else the current selection,
    /// else the first enumerated device that the pipeline accepts.
    fn reconcile(
        &mut self,
        direction: Direction,
        preferred: Option<&str>,
        issues: &mut Vec<SessionError>,
    ) {
        *self.held_slot(direction) = None;
        let snapshot = self.registry.last_snapshot().clone();
        let wanted = preferred.and_then(|id| snapshot.find(direction, id));

        let mut candidates: Vec<DeviceDescriptor> = Vec::new();
        let current = self.selected(direction).filter(|d| snapshot.contains(d));
        for device in wanted.into_iter().chain(current).chain(snapshot.devices(direction)) {
            if !candidates.contains(device) {
                candidates.push(device.clone());
            }
        }

        if let (Some(id), None, Some(first)) = (preferred, wanted, candidates.first()) {
            log::warn!("Stored {} device '{}' is gone; falling back to '{}'", direction, id, first.id);
        }

        for device in candidates {
            match self.select_device(direction, &device) {
                Ok(()) => {
                    if let Some(id) = self.held(direction) {
                        log::warn!("Using {} device '{}' while '{}' is refused", direction, device.id, id);
                    }
                    return;
                }
                Err(e) => {
                    if preferred == Some(device.id.as_str()) {
                        *self.held_slot(direction) = Some(device.id.clone());
                    }
                    issues.push(e);
                }
            }
        }

        if self.selected(direction).is_some() {
            log::warn!("No usable {} device; clearing selection", direction);
        }
        self.store_selection(direction, None);
    }

    fn held(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Input => self.held_input.as_deref(),
            Direction::Output => self.held_output.as_deref(),
        }
    }

    fn held_slot(&mut self, direction: Direction) -> &mut Option<String> {
        match direction {
            Direction::Input => &mut self.held_input,
            Direction::Output => &mut self.held_output,
        }
    }

    /// The device id that gets persisted: a held preference wins over the
    /// fallback in use.
    fn preferred_id(&self, direction: Direction) -> Option<String> {
        self.held(direction)
            .map(str::to_string)
            .or_else(|| self.selected(direction).map(|d| d.id.clone()))
    }

    // ---- devices ----

    pub fn select_input_device(&mut self, device: &DeviceDescriptor) -> Result<(), SessionError> {
        self.select_device(Direction::Input, device)
    }

    pub fn select_output_device(&mut self, device: &DeviceDescriptor) -> Result<(), SessionError> {
        self.select_device(Direction::Output, device)
    }

    /// Bind by identifier against the last enumeration.
    pub fn select_device_by_id(&mut self, direction: Direction, id: &str) -> Result<(), SessionError> {
        let device = self
            .registry
            .last_snapshot()
            .find(direction, id)
            .cloned()
            .ok_or_else(|| BindingError::DeviceNotPresent {
                id: id.to_string(),
                direction,
            })?;
        self.select_device(direction, &device)
    }

    fn select_device(&mut self, direction: Direction, device: &DeviceDescriptor) -> Result<(), SessionError> {
        if self.selected(direction) == Some(device) && (self.restoring || self.held(direction).is_none()) {
            return Ok(());
        }

        let snapshot = self.registry.last_snapshot().clone();
        if self.restoring {
            self.controller.bind_device(direction, device, &snapshot)?;
            self.store_selection(direction, Some(device.clone()));
            return Ok(());
        }

        let mut record = self.projection();
        match direction {
            Direction::Input => record.last_input_device = Some(device.id.clone()),
            Direction::Output => record.last_output_device = Some(device.id.clone()),
        }
        let result = match direction {
            Direction::Input => self.controller.select_input_device(device, &snapshot, &record),
            Direction::Output => self.controller.select_output_device(device, &snapshot, &record),
        };

        match result {
            Ok(()) => {
                self.dirty = false;
                *self.held_slot(direction) = None;
                self.store_selection(direction, Some(device.clone()));
                Ok(())
            }
            Err(BindingError::Store(e)) => {
                // The pipeline switched; only durability failed.
                self.dirty = true;
                *self.held_slot(direction) = None;
                self.store_selection(direction, Some(device.clone()));
                Err(BindingError::Store(e).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn store_selection(&mut self, direction: Direction, device: Option<DeviceDescriptor>) {
        let (slot, field) = match direction {
            Direction::Input => (&mut self.selection.selected_input, Field::SelectedInput),
            Direction::Output => (&mut self.selection.selected_output, Field::SelectedOutput),
        };
        if *slot == device {
            return;
        }
        *slot = device.clone();
        self.notify(field, SettingValue::Device(device));
    }

    // ---- audio ----

    pub fn set_microphone_volume(&mut self, value: f64) -> Result<(), SessionError> {
        let value = validator::clamp_microphone_volume(value);
        if self.audio.microphone_volume == value {
            return Ok(());
        }
        self.audio.microphone_volume = value;
        self.apply_audio(Field::MicrophoneVolume, SettingValue::Number(value))
    }

    pub fn set_microphone_boost(&mut self, value: f64) -> Result<(), SessionError> {
        let value = validator::clamp_microphone_boost(value);
        if self.audio.microphone_boost == value {
            return Ok(());
        }
        self.audio.microphone_boost = value;
        self.apply_audio(Field::MicrophoneBoost, SettingValue::Number(value))
    }

    pub fn set_output_volume(&mut self, value: f64) -> Result<(), SessionError> {
        let value = validator::clamp_output_volume(value);
        if self.audio.output_volume == value {
            return Ok(());
        }
        self.audio.output_volume = value;
        self.apply_audio(Field::OutputVolume, SettingValue::Number(value))
    }

    pub fn set_noise_suppression_enabled(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.audio.noise_suppression_enabled == enabled {
            return Ok(());
        }
        self.audio.noise_suppression_enabled = enabled;
        self.apply_audio(Field::NoiseSuppressionEnabled, SettingValue::Flag(enabled))
    }

    /// `percent` is the UI value, 0..=100.
    pub fn set_noise_threshold(&mut self, percent: f64) -> Result<(), SessionError> {
        let value = validator::clamp_noise_threshold(percent);
        if self.audio.noise_threshold == value {
            return Ok(());
        }
        self.audio.noise_threshold = value;
        self.apply_audio(Field::NoiseThreshold, SettingValue::Number(value))
    }

    pub fn set_automatic_gain_control(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.audio.automatic_gain_control == enabled {
            return Ok(());
        }
        self.audio.automatic_gain_control = enabled;
        self.apply_audio(Field::AutomaticGainControl, SettingValue::Flag(enabled))
    }

    pub fn set_echo_cancellation(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.audio.echo_cancellation == enabled {
            return Ok(());
        }
        self.audio.echo_cancellation = enabled;
        self.apply_audio(Field::EchoCancellation, SettingValue::Flag(enabled))
    }

    /// While restoring, only memory and observers are updated; `load`
    /// pushes the whole parameter set once afterwards.
    fn apply_audio(&mut self, field: Field, value: SettingValue) -> Result<(), SessionError> {
        if self.restoring {
            self.notify(field, value);
            return Ok(());
        }
        let record = self.projection();
        let result = self.controller.set_parameters(&self.audio, &record);
        self.notify(field, value);

        match result {
            Ok(report) => {
                self.dirty = false;
                match report.failures.into_iter().next() {
                    Some(e) => Err(e.into()),
                    None => Ok(()),
                }
            }
            Err(e) => {
                self.dirty = true;
                Err(e.into())
            }
        }
    }

    // ---- network ----

    /// Out-of-range ports, including negative ones, clamp to 1024..=65535.
    pub fn set_default_port(&mut self, port: i64) -> Result<(), SessionError> {
        let value = validator::clamp_port(port);
        if self.network.default_port == value {
            return Ok(());
        }
        self.network.default_port = value;
        self.commit(Field::DefaultPort, SettingValue::Port(value))
    }

    pub fn set_connection_timeout(&mut self, secs: f64) -> Result<(), SessionError> {
        let value = validator::clamp_connection_timeout(secs);
        if self.network.connection_timeout_secs == value {
            return Ok(());
        }
        self.network.connection_timeout_secs = value;
        self.commit(Field::ConnectionTimeoutSecs, SettingValue::Number(value))
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.network.auto_reconnect == enabled {
            return Ok(());
        }
        self.network.auto_reconnect = enabled;
        self.commit(Field::AutoReconnect, SettingValue::Flag(enabled))
    }

    pub fn set_voice_quality(&mut self, quality: VoiceQuality) -> Result<(), SessionError> {
        if self.network.voice_quality == quality {
            return Ok(());
        }
        self.network.voice_quality = quality;
        self.commit(Field::VoiceQuality, SettingValue::Quality(quality))
    }

    pub fn set_enable_qos(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.network.enable_qos == enabled {
            return Ok(());
        }
        self.network.enable_qos = enabled;
        self.commit(Field::EnableQos, SettingValue::Flag(enabled))
    }

    // ---- profile ----

    pub fn set_user_name(&mut self, name: &str) -> Result<(), SessionError> {
        let value = validator::normalize_user_name(name);
        if self.profile.user_name == value {
            return Ok(());
        }
        self.profile.user_name = value.clone();
        self.commit(Field::UserName, SettingValue::Text(value))
    }

    pub fn set_user_avatar_path(&mut self, path: Option<&str>) -> Result<(), SessionError> {
        let value = validator::normalize_avatar_path(path);
        if self.profile.user_avatar_path == value {
            return Ok(());
        }
        self.profile.user_avatar_path = value.clone();
        self.commit(Field::UserAvatarPath, SettingValue::OptionalText(value))
    }

    // ---- hotkeys ----

    pub fn set_push_to_talk_key(&mut self, binding: &str) -> Result<(), SessionError> {
        let value = validator::normalize_hotkey(binding, DEFAULT_PUSH_TO_TALK);
        if self.hotkeys.push_to_talk == value {
            return Ok(());
        }
        self.hotkeys.push_to_talk = value.clone();
        self.commit(Field::PushToTalkKey, SettingValue::Text(value))
    }

    pub fn set_toggle_mute_key(&mut self, binding: &str) -> Result<(), SessionError> {
        let value = validator::normalize_hotkey(binding, DEFAULT_TOGGLE_MUTE);
        if self.hotkeys.toggle_mute == value {
            return Ok(());
        }
        self.hotkeys.toggle_mute = value.clone();
        self.commit(Field::ToggleMuteKey, SettingValue::Text(value))
    }

    pub fn set_toggle_deafen_key(&mut self, binding: &str) -> Result<(), SessionError> {
        let value = validator::normalize_hotkey(binding, DEFAULT_TOGGLE_DEAFEN);
        if self.hotkeys.toggle_deafen == value {
            return Ok(());
        }
        self.hotkeys.toggle_deafen = value.clone();
        self.commit(Field::ToggleDeafenKey, SettingValue::Text(value))
    }

    /// Persist a non-audio change, then notify. Memory keeps the new value
    /// even when the store refuses it.
    fn commit(&mut self, field: Field, value: SettingValue) -> Result<(), SessionError> {
        let result = self.persist();
        self.notify(field, value);
        result.map_err(SessionError::from)
    }

    // ---- persistence ----

    /// Write the whole in-memory configuration. Retries after a failed write.
    pub fn save(&mut self) -> Result<(), StoreError> {
        let record = self.projection();
        let result = self.controller.persist(&record);
        self.dirty = result.is_err();
        result
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        if self.restoring {
            return Ok(());
        }
        self.save()
    }

    /// Memory holds changes the store has not accepted yet.
    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    /// The durable form of the current configuration.
    pub fn projection(&self) -> PersistedConfiguration {
        PersistedConfiguration {
            microphone_volume: self.audio.microphone_volume,
            microphone_boost: self.audio.microphone_boost,
            output_volume: self.audio.output_volume,
            noise_suppression_enabled: self.audio.noise_suppression_enabled,
            noise_threshold: validator::percent_to_fraction(self.audio.noise_threshold),
            automatic_gain_control: self.audio.automatic_gain_control,
            echo_cancellation: self.audio.echo_cancellation,
            default_port: self.network.default_port,
            connection_timeout_secs: self.network.connection_timeout_secs,
            auto_reconnect: self.network.auto_reconnect,
            voice_quality: self.network.voice_quality,
            enable_qos: self.network.enable_qos,
            last_input_device: self.preferred_id(Direction::Input),
            last_output_device: self.preferred_id(Direction::Output),
            user_name: self.profile.user_name.clone(),
            user_avatar_path: self.profile.user_avatar_path.clone(),
            push_to_talk_key: self.hotkeys.push_to_talk.clone(),
            toggle_mute_key: self.hotkeys.toggle_mute.clone(),
            toggle_deafen_key: self.hotkeys.toggle_deafen.clone(),
        }
    }

    fn notify(&mut self, field: Field, value: SettingValue) {
        let change = SettingChange { field, value };
        self.observers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    // ---- getters ----

    pub fn audio(&self) -> &AudioParameters {
        &self.audio
    }

    pub fn network(&self) -> &NetworkPreferences {
        &self.network
    }

    pub fn selection(&self) -> &DeviceSelection {
        &self.selection
    }

    pub fn selected(&self, direction: Direction) -> Option<&DeviceDescriptor> {
        match direction {
            Direction::Input => self.selection.selected_input.as_ref(),
            Direction::Output => self.selection.selected_output.as_ref(),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn hotkeys(&self) -> &Hotkeys {
        &self.hotkeys
    }

    pub fn devices(&self) -> &DeviceSnapshot {
        self.registry.last_snapshot()
    }

    pub fn binding_state(&self) -> BindingState {
        self.controller.state()
    }

    pub fn microphone_volume(&self) -> f64 {
        self.audio.microphone_volume
    }

    pub fn noise_threshold(&self) -> f64 {
        self.audio.noise_threshold
    }
}
