//! Safe wrappers around SpeexDSP's preprocessor (denoise/AGC) and echo canceller.

use std::ffi::{c_int, c_void};

// ======================== FFI declarations ========================

/// Opaque type for SpeexPreprocessState
#[repr(C)]
pub struct SpeexPreprocessState {
    _private: [u8; 0],
}

/// Opaque type for SpeexEchoState
#[repr(C)]
pub struct SpeexEchoState {
    _private: [u8; 0],
}

// Preprocessor request constants
const SPEEX_PREPROCESS_SET_DENOISE: c_int = 0;
const SPEEX_PREPROCESS_SET_AGC: c_int = 2;
const SPEEX_PREPROCESS_SET_AGC_LEVEL: c_int = 6;
const SPEEX_PREPROCESS_SET_NOISE_SUPPRESS: c_int = 8;
const SPEEX_PREPROCESS_SET_ECHO_STATE: c_int = 24;
const SPEEX_PREPROCESS_SET_AGC_MAX_GAIN: c_int = 30;

unsafe extern "C" {
    fn speex_preprocess_state_init(frame_size: c_int, sampling_rate: c_int)
        -> *mut SpeexPreprocessState;
    fn speex_preprocess_state_destroy(st: *mut SpeexPreprocessState);
    fn speex_preprocess_run(st: *mut SpeexPreprocessState, x: *mut i16) -> c_int;
    fn speex_preprocess_ctl(
        st: *mut SpeexPreprocessState,
        request: c_int,
        ptr: *mut c_void,
    ) -> c_int;

    fn speex_echo_state_init(frame_size: c_int, filter_length: c_int) -> *mut SpeexEchoState;
    fn speex_echo_state_destroy(st: *mut SpeexEchoState);
    fn speex_echo_cancellation(
        st: *mut SpeexEchoState,
        rec: *const i16,
        play: *const i16,
        out: *mut i16,
    );
}

// ======================== Preprocessor (denoise + AGC) ========================

/// Safe wrapper around SpeexPreprocessState for noise suppression and AGC.
pub struct Preprocessor {
    state: *mut SpeexPreprocessState,
    frame_size: usize,
}

// SpeexPreprocessState is used from a single thread only
unsafe impl Send for Preprocessor {}

impl Preprocessor {
    /// Create a new preprocessor for a given frame size (in samples) and sample rate.
    pub fn new(frame_size: usize, sample_rate: u32) -> anyhow::Result<Self> {
        let state = unsafe {
            speex_preprocess_state_init(frame_size as c_int, sample_rate as c_int)
        };
        if state.is_null() {
            anyhow::bail!("Failed to initialize speex preprocessor");
        }
        Ok(Self { state, frame_size })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn ctl_int(&mut self, request: c_int, value: c_int) -> bool {
        let mut val = value;
        let ret = unsafe {
            speex_preprocess_ctl(self.state, request, &mut val as *mut c_int as *mut c_void)
        };
        ret == 0
    }

    /// Enable or disable denoising.
    pub fn set_denoise(&mut self, enable: bool) -> bool {
        self.ctl_int(SPEEX_PREPROCESS_SET_DENOISE, enable as c_int)
    }

    /// Set noise suppress level in dB (negative value, e.g. -25).
    pub fn set_noise_suppress(&mut self, level: i32) -> bool {
        self.ctl_int(SPEEX_PREPROCESS_SET_NOISE_SUPPRESS, level)
    }

    /// Enable or disable automatic gain control.
    pub fn set_agc(&mut self, enable: bool) -> bool {
        self.ctl_int(SPEEX_PREPROCESS_SET_AGC, enable as c_int)
    }

    /// Maximum gain the AGC may apply, in dB.
    pub fn set_agc_max_gain(&mut self, db: i32) -> bool {
        self.ctl_int(SPEEX_PREPROCESS_SET_AGC_MAX_GAIN, db)
    }

    /// Set AGC level (target signal level).
    pub fn set_agc_level(&mut self, level: f32) -> bool {
        let mut val: f32 = level;
        let ret = unsafe {
            speex_preprocess_ctl(
                self.state,
                SPEEX_PREPROCESS_SET_AGC_LEVEL,
                &mut val as *mut f32 as *mut c_void,
            )
        };
        ret == 0
    }

    /// Attach (or with `None`, detach) an echo canceller for residual echo removal.
    ///
    /// The canceller must outlive this preprocessor or be detached first.
    pub fn set_echo_state(&mut self, echo: Option<&EchoCanceller>) -> bool {
        let ptr = echo.map_or(std::ptr::null_mut(), |e| e.state);
        let ret = unsafe {
            speex_preprocess_ctl(self.state, SPEEX_PREPROCESS_SET_ECHO_STATE, ptr as *mut c_void)
        };
        ret == 0
    }

    /// Run the preprocessor on a frame of 16-bit PCM mono samples.
    /// The samples are modified in-place.
    pub fn process(&mut self, samples: &mut [i16]) {
        if samples.len() < self.frame_size {
            return;
        }
        unsafe {
            speex_preprocess_run(self.state, samples.as_mut_ptr());
        }
    }
}

impl Drop for Preprocessor {
    fn drop(&mut self) {
        unsafe {
            speex_preprocess_state_destroy(self.state);
        }
    }
}

// ======================== Echo canceller ========================

/// Safe wrapper around SpeexEchoState.
pub struct EchoCanceller {
    state: *mut SpeexEchoState,
    frame_size: usize,
}

unsafe impl Send for EchoCanceller {}

impl EchoCanceller {
    /// `filter_length` is the echo tail in samples (100-500 ms is typical).
    pub fn new(frame_size: usize, filter_length: usize) -> anyhow::Result<Self> {
        let state =
            unsafe { speex_echo_state_init(frame_size as c_int, filter_length as c_int) };
        if state.is_null() {
            anyhow::bail!("Failed to initialize speex echo canceller");
        }
        Ok(Self { state, frame_size })
    }

    /// Remove the far-end signal `play` from the captured frame `rec` in place.
    pub fn cancel(&mut self, rec: &mut [i16], play: &[i16]) {
        if rec.len() < self.frame_size || play.len() < self.frame_size {
            return;
        }
        let mut out = vec![0i16; self.frame_size];
        unsafe {
            speex_echo_cancellation(self.state, rec.as_ptr(), play.as_ptr(), out.as_mut_ptr());
        }
        rec[..self.frame_size].copy_from_slice(&out);
    }
}

impl Drop for EchoCanceller {
    fn drop(&mut self) {
        unsafe {
            speex_echo_state_destroy(self.state);
        }
    }
}
