//! ALSA-backed device enumeration and capture pipeline.
//!
//! Device switches are validated by actually opening the PCM with the
//! configured format, so a device that enumerates but cannot be opened
//! (busy, wrong format) is refused at selection time rather than at the
//! first read. DSP settings are held here and pushed into a SpeexDSP
//! preprocessor sized to whatever the capture device negotiated.

use alsa::pcm::PCM;

use super::alsa_device::{self, AlsaParams};
use super::device::{DeviceDescriptor, DeviceEnumerator, Direction};
use super::pipeline::{AudioPipeline, GainStage};
use super::speex::{EchoCanceller, Preprocessor};
use crate::error::PipelineApplyError;

/// Echo tail handed to the canceller, in milliseconds.
const ECHO_TAIL_MS: u32 = 200;

/// Target level for the AGC.
const AGC_LEVEL: f32 = 24000.0;

/// Deepest suppression the noise threshold maps onto, in dB.
const MAX_NOISE_SUPPRESS_DB: f64 = 45.0;

pub struct AlsaEnumerator;

impl DeviceEnumerator for AlsaEnumerator {
    fn enumerate(&self, direction: Direction) -> anyhow::Result<Vec<DeviceDescriptor>> {
        let alsa_dir = match direction {
            Direction::Input => alsa::Direction::Capture,
            Direction::Output => alsa::Direction::Playback,
        };
        Ok(alsa_device::list_pcm_names(alsa_dir)?
            .into_iter()
            .map(|name| DeviceDescriptor::new(name, direction))
            .collect())
    }
}

/// Values the DSP stage is configured with, independent of whether a
/// capture device is currently open.
#[derive(Debug, Clone)]
struct DspSettings {
    denoise: bool,
    noise_suppress_db: i32,
    agc: bool,
    boost_db: i32,
    echo_cancellation: bool,
}

impl Default for DspSettings {
    fn default() -> Self {
        Self {
            denoise: true,
            noise_suppress_db: -25,
            agc: true,
            boost_db: 0,
            echo_cancellation: true,
        }
    }
}

struct Capture {
    _pcm: PCM,
    params: AlsaParams,
    preprocessor: Preprocessor,
    echo: Option<EchoCanceller>,
}

pub struct AlsaPipeline {
    sample_rate: u32,
    channels: u32,
    period_size: usize,
    capture: Option<Capture>,
    _playback: Option<PCM>,
    dsp: DspSettings,
    input_gain: f32,
    /// Linear form of the microphone boost, applied after `input_gain`.
    boost_gain: f32,
    output_gain: f32,
}

// PCM handles are only touched from the owning session's thread.
unsafe impl Send for AlsaPipeline {}

impl AlsaPipeline {
    pub fn new(sample_rate: u32, channels: u32, period_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            period_size,
            capture: None,
            _playback: None,
            dsp: DspSettings::default(),
            input_gain: 1.0,
            boost_gain: 1.0,
            output_gain: 1.0,
        }
    }

    fn capture_gain(&self) -> f32 {
        self.input_gain * self.boost_gain
    }

    /// Run one captured mono frame through gain, echo cancellation and the
    /// preprocessor. `far_end` is the frame most recently sent to playback.
    /// The streaming loop that owns the PCM reads is not part of this crate.
    #[allow(dead_code)]
    fn process_capture(&mut self, frame: &mut [i16], far_end: Option<&[i16]>) {
        apply_gain(frame, self.capture_gain());
        if let Some(capture) = self.capture.as_mut() {
            if let (Some(echo), Some(play)) = (capture.echo.as_mut(), far_end) {
                echo.cancel(frame, play);
            }
            capture.preprocessor.process(frame);
        }
    }

    /// Scale one playback frame by the output volume.
    #[allow(dead_code)]
    fn process_playback(&self, frame: &mut [i16]) {
        apply_gain(frame, self.output_gain);
    }

    fn open_capture(&self, id: &str) -> anyhow::Result<Capture> {
        let (pcm, params) = alsa_device::open_capture(id, self.sample_rate, self.channels)?;
        let preprocessor = Preprocessor::new(params.period_size, params.sample_rate)?;
        let mut capture = Capture {
            _pcm: pcm,
            params,
            preprocessor,
            echo: None,
        };
        self.configure(&mut capture)?;
        Ok(capture)
    }

    /// Push every DSP setting into the capture's preprocessor.
    fn configure(&self, capture: &mut Capture) -> anyhow::Result<()> {
        let pp = &mut capture.preprocessor;
        check_ctl(pp.set_denoise(self.dsp.denoise), "SET_DENOISE")?;
        check_ctl(pp.set_noise_suppress(self.dsp.noise_suppress_db), "SET_NOISE_SUPPRESS")?;
        check_ctl(pp.set_agc(self.dsp.agc), "SET_AGC")?;
        check_ctl(pp.set_agc_level(AGC_LEVEL), "SET_AGC_LEVEL")?;
        check_ctl(pp.set_agc_max_gain(self.dsp.boost_db), "SET_AGC_MAX_GAIN")?;

        if self.dsp.echo_cancellation {
            if capture.echo.is_none() {
                let tail = (capture.params.sample_rate * ECHO_TAIL_MS / 1000) as usize;
                capture.echo = Some(EchoCanceller::new(capture.params.period_size, tail)?);
            }
            let ok = capture.preprocessor.set_echo_state(capture.echo.as_ref());
            check_ctl(ok, "SET_ECHO_STATE")?;
        } else {
            let ok = capture.preprocessor.set_echo_state(None);
            capture.echo = None;
            check_ctl(ok, "SET_ECHO_STATE")?;
        }
        Ok(())
    }

    fn reconfigure(&mut self, setting: &'static str) -> Result<(), PipelineApplyError> {
        let Some(mut capture) = self.capture.take() else {
            return Ok(());
        };
        let result = self.configure(&mut capture);
        self.capture = Some(capture);
        result.map_err(|e| rejection(setting, e))
    }
}

impl AudioPipeline for AlsaPipeline {
    fn set_input_device(&mut self, id: &str) -> Result<(), PipelineApplyError> {
        let capture = self
            .open_capture(id)
            .map_err(|e| rejection("input_device", e))?;
        self.capture = Some(capture);
        Ok(())
    }

    fn set_output_device(&mut self, id: &str) -> Result<(), PipelineApplyError> {
        let (pcm, params) = alsa_device::open_playback(
            id,
            self.sample_rate,
            self.channels,
            Some(self.period_size),
        )
        .map_err(|e| rejection("output_device", e))?;
        log::info!(
            "Playback on '{}': {} Hz, {} ch, period {}",
            id,
            params.sample_rate,
            params.channels,
            params.period_size
        );
        self._playback = Some(pcm);
        Ok(())
    }

    fn set_noise_suppression(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        self.dsp.denoise = enabled;
        self.reconfigure("noise_suppression_enabled")
    }

    fn set_noise_threshold(&mut self, fraction: f64) -> Result<(), PipelineApplyError> {
        self.dsp.noise_suppress_db = -(fraction.clamp(0.0, 1.0) * MAX_NOISE_SUPPRESS_DB).round() as i32;
        self.reconfigure("noise_threshold")
    }

    fn set_gain(&mut self, stage: GainStage, value: f64) -> Result<(), PipelineApplyError> {
        match stage {
            // 50% is unity gain, 100% doubles the signal
            GainStage::MicrophoneVolume => self.input_gain = (value / 50.0) as f32,
            GainStage::OutputVolume => {
                self.output_gain = (value / 50.0) as f32;
                log::debug!("Playback gain now {:.3}", self.output_gain);
                return Ok(());
            }
            GainStage::MicrophoneBoost => {
                // Boost is a fixed gain stage and also caps how far AGC may amplify.
                self.boost_gain = 10f64.powf(value / 20.0) as f32;
                self.dsp.boost_db = value.round() as i32;
                log::debug!("Capture gain now {:.3}", self.capture_gain());
                return self.reconfigure("microphone_boost");
            }
        }
        log::debug!("Capture gain now {:.3}", self.capture_gain());
        Ok(())
    }

    fn set_automatic_gain_control(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        self.dsp.agc = enabled;
        self.reconfigure("automatic_gain_control")
    }

    fn set_echo_cancellation(&mut self, enabled: bool) -> Result<(), PipelineApplyError> {
        self.dsp.echo_cancellation = enabled;
        self.reconfigure("echo_cancellation")
    }
}

/// SpeexDSP ctls report failure through their return code.
fn check_ctl(ok: bool, ctl: &str) -> anyhow::Result<()> {
    if !ok {
        anyhow::bail!("speex preprocessor refused {}", ctl);
    }
    Ok(())
}

fn rejection(setting: &'static str, err: anyhow::Error) -> PipelineApplyError {
    PipelineApplyError::rejected(setting, format!("{:#}", err))
}

fn apply_gain(frame: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for s in frame.iter_mut() {
        *s = (*s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}
