//! JSON messages exchanged with the GUI process.
//!
//! Inbound: `{"type":"set","field":"microphone_volume","value":80}`,
//! `{"type":"select_device","direction":"input","id":"hw:1,0"}`,
//! `{"type":"refresh_devices"}`, `{"type":"snapshot"}`, `{"type":"save"}`.
//!
//! Outbound: one `changed` message per stored setting, plus `devices`,
//! `snapshot` and `error` replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::audio::{DeviceDescriptor, DeviceSnapshot, Direction};
use crate::error::SessionError;
use crate::session::{ConfigurationSession, Field, SettingChange};
use crate::settings::{AudioParameters, DeviceSelection, Hotkeys, NetworkPreferences, Profile, VoiceQuality};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuiCommand {
    Set { field: Field, value: Value },
    SelectDevice { direction: Direction, id: String },
    RefreshDevices,
    Snapshot,
    Save,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuiMessage {
    Changed(SettingChange),
    Devices {
        inputs: Vec<DeviceDescriptor>,
        outputs: Vec<DeviceDescriptor>,
    },
    Snapshot {
        audio: AudioParameters,
        network: NetworkPreferences,
        selection: DeviceSelection,
        profile: Profile,
        hotkeys: Hotkeys,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed GUI message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid value for {field:?}: {value}")]
    InvalidValue { field: Field, value: Value },
}

impl GuiCommand {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl GuiMessage {
    pub fn devices(snapshot: &DeviceSnapshot) -> Self {
        GuiMessage::Devices {
            inputs: snapshot.inputs.clone(),
            outputs: snapshot.outputs.clone(),
        }
    }

    pub fn snapshot(session: &ConfigurationSession) -> Self {
        GuiMessage::Snapshot {
            audio: session.audio().clone(),
            network: session.network().clone(),
            selection: session.selection().clone(),
            profile: session.profile().clone(),
            hotkeys: session.hotkeys().clone(),
        }
    }

    pub fn error(err: impl std::fmt::Display) -> Self {
        GuiMessage::Error {
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Run one command against the session and return the direct replies.
/// Setting changes themselves reach the GUI through the session's
/// observer channel, not through this return value.
pub fn dispatch(session: &mut ConfigurationSession, command: GuiCommand) -> Vec<GuiMessage> {
    match command {
        GuiCommand::Set { field, value } => match apply_set(session, field, &value) {
            Ok(Ok(())) => Vec::new(),
            Ok(Err(e)) => vec![GuiMessage::error(e)],
            Err(e) => vec![GuiMessage::error(e)],
        },
        GuiCommand::SelectDevice { direction, id } => {
            match session.select_device_by_id(direction, &id) {
                Ok(()) => Vec::new(),
                Err(e) => vec![GuiMessage::error(e)],
            }
        }
        GuiCommand::RefreshDevices => {
            let (snapshot, issues) = session.refresh_devices();
            let mut replies = vec![GuiMessage::devices(&snapshot)];
            replies.extend(issues.into_iter().map(GuiMessage::error));
            replies
        }
        GuiCommand::Snapshot => vec![
            GuiMessage::devices(session.devices()),
            GuiMessage::snapshot(session),
        ],
        GuiCommand::Save => match session.save() {
            Ok(()) => Vec::new(),
            Err(e) => vec![GuiMessage::error(e)],
        },
    }
}

/// Outer error: the JSON value had the wrong shape. Inner: the session refused it.
fn apply_set(
    session: &mut ConfigurationSession,
    field: Field,
    value: &Value,
) -> Result<Result<(), SessionError>, ProtocolError> {
    let invalid = || ProtocolError::InvalidValue {
        field,
        value: value.clone(),
    };
    let number = || value.as_f64().ok_or_else(invalid);
    let flag = || value.as_bool().ok_or_else(invalid);
    let text = || value.as_str().ok_or_else(invalid);

    let result = match field {
        Field::MicrophoneVolume => session.set_microphone_volume(number()?),
        Field::MicrophoneBoost => session.set_microphone_boost(number()?),
        Field::OutputVolume => session.set_output_volume(number()?),
        Field::NoiseSuppressionEnabled => session.set_noise_suppression_enabled(flag()?),
        Field::NoiseThreshold => session.set_noise_threshold(number()?),
        Field::AutomaticGainControl => session.set_automatic_gain_control(flag()?),
        Field::EchoCancellation => session.set_echo_cancellation(flag()?),
        Field::DefaultPort => {
            // Fractional or huge ports still clamp instead of being refused.
            let port = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f.round() as i64))
                .ok_or_else(invalid)?;
            session.set_default_port(port)
        }
        Field::ConnectionTimeoutSecs => session.set_connection_timeout(number()?),
        Field::AutoReconnect => session.set_auto_reconnect(flag()?),
        Field::VoiceQuality => {
            let quality: VoiceQuality = text()?.parse().map_err(|_| invalid())?;
            session.set_voice_quality(quality)
        }
        Field::EnableQos => session.set_enable_qos(flag()?),
        Field::SelectedInput => session.select_device_by_id(Direction::Input, text()?),
        Field::SelectedOutput => session.select_device_by_id(Direction::Output, text()?),
        Field::UserName => session.set_user_name(text()?),
        Field::UserAvatarPath => {
            let path = if value.is_null() { None } else { Some(text()?) };
            session.set_user_avatar_path(path)
        }
        Field::PushToTalkKey => session.set_push_to_talk_key(text()?),
        Field::ToggleMuteKey => session.set_toggle_mute_key(text()?),
        Field::ToggleDeafenKey => session.set_toggle_deafen_key(text()?),
    };
    Ok(result)
}
