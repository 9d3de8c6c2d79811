use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use zvonilka::audio::{AudioPipeline, DeviceDescriptor, DeviceRegistry, Direction, GainStage, StaticEnumerator};
use zvonilka::protocol::{self, GuiCommand};
use zvonilka::{
    BindingState, ConfigurationSession, Field, PipelineApplyError, PreferenceStore, SessionError,
    SettingValue, StorageMedium, StoreError, TomlFileMedium, VoiceQuality,
};

#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
    unplugged: Arc<Mutex<bool>>,
    refused: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    fn unplug(&self) {
        *self.unplugged.lock().unwrap() = true;
    }

    fn replug(&self) {
        *self.unplugged.lock().unwrap() = false;
    }

    fn refuse(&self, id: &str) {
        self.refused.lock().unwrap().push(id.to_string());
    }

    fn open(&self, setting: &'static str, entry: String, id: &str) -> Result<(), PipelineApplyError> {
        if self.refused.lock().unwrap().iter().any(|r| r == id) {
            return Err(PipelineApplyError::rejected(setting, format!("cannot open '{id}'")));
        }
        self.push(entry)
    }

    fn push(&self, entry: String) -> Result<(), PipelineApplyError> {
        if *self.unplugged.lock().unwrap() {
            return Err(PipelineApplyError::Disconnected("cable pulled".into()));
        }
        self.log.lock().unwrap().push(entry);
        Ok(())
    }
}

impl AudioPipeline for Recorder {
    fn set_input_device(&mut self, id: &str) -> Result<(), PipelineApplyError> {
        self.open("input_device", format!("input={id}"), id)
    }

    fn set_output_device(&mut self, id: &str) -> Result<(), PipelineApplyError> {
        self.open("output_device", format!("output={id}"), id)
    }

    fn set_noise_suppression(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        self.push(format!("ns={enabled}"))
    }

    fn set_noise_threshold(&mut self, fraction: f64) -> Result<(), PipelineApplyError> {
        self.push(format!("threshold={fraction}"))
    }

    fn set_gain(&mut self, stage: GainStage, value: f64) -> Result<(), PipelineApplyError> {
        self.push(format!("{stage}={value}"))
    }

    fn set_automatic_gain_control(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        self.push(format!("agc={enabled}"))
    }

    fn set_echo_cancellation(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        self.push(format!("aec={enabled}"))
    }
}

/// Reads fine, refuses every write.
struct ReadOnlyMedium;

impl StorageMedium for ReadOnlyMedium {
    fn entries(&self) -> Result<BTreeMap<String, toml::Value>, StoreError> {
        Ok(BTreeMap::new())
    }

    fn set(&mut self, _key: &str, _value: Option<toml::Value>) -> Result<(), StoreError> {
        Err(StoreError::PermissionDenied("settings are read-only".into()))
    }
}

fn session_at(dir: &TempDir, inputs: &[&str], recorder: &Recorder) -> ConfigurationSession {
    let medium = TomlFileMedium::new(dir.path().join("settings.toml"));
    ConfigurationSession::new(
        DeviceRegistry::new(Box::new(StaticEnumerator::new(
            inputs.iter().copied(),
            ["speakers"],
        ))),
        Box::new(recorder.clone()),
        PreferenceStore::new(Box::new(medium)),
    )
}

#[test]
fn settings_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::default();

    let mut first = session_at(&dir, &["builtin", "usb"], &recorder);
    first.load();
    first.select_device_by_id(Direction::Input, "usb").unwrap();
    first.set_noise_threshold(40.0).unwrap();
    first.set_microphone_boost(12.5).unwrap();
    first.set_voice_quality(VoiceQuality::Low).unwrap();
    first.set_user_name("Ada").unwrap();
    drop(first);

    let mut second = session_at(&dir, &["builtin", "usb"], &recorder);
    let outcome = second.load();

    assert!(outcome.issues.is_empty());
    assert_eq!(second.selected(Direction::Input), Some(&DeviceDescriptor::input("usb")));
    assert_eq!(second.noise_threshold(), 40.0);
    assert_eq!(second.audio().microphone_boost, 12.5);
    assert_eq!(second.network().voice_quality, VoiceQuality::Low);
    assert_eq!(second.profile().user_name, "Ada");
}

#[test]
fn restart_replays_stored_values_to_the_pipeline() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::default();

    let mut first = session_at(&dir, &["builtin"], &recorder);
    first.load();
    first.set_output_volume(75.0).unwrap();
    drop(first);
    recorder.take();

    let mut second = session_at(&dir, &["builtin"], &recorder);
    second.load();

    let log = recorder.take();
    assert!(log.contains(&"input=builtin".to_string()));
    assert!(log.contains(&"output_volume=75".to_string()));
    assert!(log.contains(&"threshold=0.3".to_string()));
}

#[test]
fn stored_file_is_stable_across_load_save_cycles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    let recorder = Recorder::default();

    let mut first = session_at(&dir, &["builtin"], &recorder);
    first.load();
    first.set_noise_threshold(33.3).unwrap();
    let written = fs::read_to_string(&path).unwrap();
    drop(first);

    let mut second = session_at(&dir, &["builtin"], &recorder);
    second.load();
    second.save().unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), written);
}

#[test]
fn unplugged_device_falls_back_on_next_start() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::default();

    let mut first = session_at(&dir, &["builtin", "usb"], &recorder);
    first.load();
    first.select_device_by_id(Direction::Input, "usb").unwrap();
    drop(first);

    let mut second = session_at(&dir, &["builtin"], &recorder);
    second.load();

    assert_eq!(second.selected(Direction::Input), Some(&DeviceDescriptor::input("builtin")));
    let stored = fs::read_to_string(dir.path().join("settings.toml")).unwrap();
    assert!(stored.contains(r#"last_input_device = "builtin""#));
}

#[test]
fn hand_edited_native_values_are_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, "microphone_volume = 80\nuser_name = \"Ada\"\nauto_reconnect = false\n").unwrap();
    let recorder = Recorder::default();

    let mut session = session_at(&dir, &["builtin"], &recorder);
    let outcome = session.load();

    assert!(outcome.issues.is_empty());
    assert_eq!(session.microphone_volume(), 80.0);
    assert_eq!(session.profile().user_name, "Ada");
    assert!(!session.network().auto_reconnect);
    assert!(!dir.path().join("settings.toml.backup").exists());
    assert!(recorder.take().contains(&"microphone_volume=80".to_string()));
}

#[test]
fn refused_device_keeps_its_place_in_the_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, "last_input_device = \"usb\"\n").unwrap();
    let recorder = Recorder::default();
    recorder.refuse("usb");

    let mut session = session_at(&dir, &["builtin", "usb"], &recorder);
    let outcome = session.load();

    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(session.selected(Direction::Input), Some(&DeviceDescriptor::input("builtin")));
    let stored = fs::read_to_string(&path).unwrap();
    assert!(stored.contains(r#"last_input_device = "usb""#), "{stored}");
}

#[test]
fn corrupt_file_is_backed_up_and_defaults_used() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, "microphone_volume = [[[").unwrap();
    let recorder = Recorder::default();

    let mut session = session_at(&dir, &["builtin"], &recorder);
    session.load();

    assert_eq!(session.microphone_volume(), 50.0);
    assert!(dir.path().join("settings.toml.backup").exists());
    assert!(fs::read_to_string(&path).unwrap().contains("microphone_volume = 50.0"));
}

#[test]
fn read_only_store_keeps_memory_and_reports_permission_denied() {
    let recorder = Recorder::default();
    let mut session = ConfigurationSession::new(
        DeviceRegistry::new(Box::new(StaticEnumerator::new(["builtin"], ["speakers"]))),
        Box::new(recorder.clone()),
        PreferenceStore::new(Box::new(ReadOnlyMedium)),
    );
    let outcome = session.load();
    assert!(outcome
        .issues
        .iter()
        .any(|e| matches!(e.store_error(), Some(StoreError::PermissionDenied(_)))));

    let mut rx = session.subscribe();
    let err = session.set_connection_timeout(60.0).unwrap_err();

    assert!(matches!(err, SessionError::Store(StoreError::PermissionDenied(_))));
    assert_eq!(session.network().connection_timeout_secs, 60.0);
    assert_eq!(rx.try_recv().unwrap().field, Field::ConnectionTimeoutSecs);
    assert!(session.has_unsaved_changes());
}

#[test]
fn lost_pipeline_reverts_and_recovers() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::default();
    let mut session = session_at(&dir, &["builtin"], &recorder);
    session.load();
    recorder.unplug();

    let err = session.set_microphone_volume(10.0).unwrap_err();

    assert!(matches!(err, SessionError::Pipeline(PipelineApplyError::Disconnected(_))));
    assert_eq!(session.binding_state(), BindingState::Bound);
    assert_eq!(session.microphone_volume(), 10.0);
    let stored = fs::read_to_string(dir.path().join("settings.toml")).unwrap();
    assert!(stored.contains("microphone_volume = 10.0"));

    // Pipeline state is unknown after a loss, so the next change resends everything.
    recorder.replug();
    recorder.take();
    session.set_echo_cancellation(false).unwrap();
    let log = recorder.take();
    assert_eq!(log.len(), 7);
    assert!(log.contains(&"microphone_volume=10".to_string()));
    assert!(log.contains(&"aec=false".to_string()));
}

#[test]
fn gui_commands_drive_the_session() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::default();
    let mut session = session_at(&dir, &["builtin"], &recorder);
    session.load();
    let mut rx = session.subscribe();

    let cmd = GuiCommand::parse(r#"{"type":"set","field":"default_port","value":80}"#).unwrap();
    let replies = protocol::dispatch(&mut session, cmd);

    assert!(replies.is_empty());
    assert_eq!(session.network().default_port, 1024);
    let change = rx.try_recv().unwrap();
    assert_eq!(change.field, Field::DefaultPort);
    assert_eq!(change.value, SettingValue::Port(1024));
}
