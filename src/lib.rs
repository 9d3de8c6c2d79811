//! zvonilka - user preferences core for a voice chat client.
//!
//! A [`ConfigurationSession`] owns the live settings, clamps every edit,
//! applies audio changes through an [`AudioBindingController`] to the
//! platform [`AudioPipeline`](audio::AudioPipeline), persists through a
//! [`PreferenceStore`], and notifies subscribers.

pub mod audio;
pub mod binding;
pub mod config;
pub mod error;
pub mod gui_bridge;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod store;
pub mod validator;

pub use binding::{ApplyReport, AudioBindingController, BindingState};
pub use error::{BindingError, PipelineApplyError, SessionError, StoreError};
pub use session::{ConfigurationSession, Field, LoadOutcome, SettingChange, SettingValue};
pub use settings::{AudioParameters, DeviceSelection, Hotkeys, NetworkPreferences, Profile, VoiceQuality};
pub use store::{MemoryMedium, PersistedConfiguration, PreferenceStore, StorageMedium, TomlFileMedium};
