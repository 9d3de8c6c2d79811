//! audio - device enumeration and the pipeline capability
//!
//! The preferences core never processes samples itself. It lists devices
//! through a [`DeviceRegistry`] and commands an [`AudioPipeline`]. With the
//! `alsa-backend` feature the pipeline is ALSA for I/O and SpeexDSP for
//! noise suppression, AGC and echo cancellation.

#[cfg(feature = "alsa-backend")]
mod alsa_backend;
#[cfg(feature = "alsa-backend")]
mod alsa_device;
#[cfg(feature = "alsa-backend")]
mod speex;

pub mod device;
pub mod pipeline;

pub use device::{DeviceDescriptor, DeviceEnumerator, DeviceRegistry, DeviceSnapshot, Direction, StaticEnumerator};
pub use pipeline::{AudioPipeline, GainStage, NullPipeline};

#[cfg(feature = "alsa-backend")]
pub use alsa_backend::{AlsaEnumerator, AlsaPipeline};
