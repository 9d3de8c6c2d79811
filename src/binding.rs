//! Binds devices and parameters to the live pipeline.
//!
//! ```text
//! Unbound ──bind──> Bound ──change──> Applying ──ok──> Bound
//!                                        │
//!                                   disconnected
//!                                        v
//!                                     Failed ──revert──> last known-good
//! ```
//!
//! The controller never owns the parameter record: each apply-cycle
//! borrows it from the session. What it keeps is the pipeline, the store,
//! and the values last pushed to the pipeline, so that only changed fields
//! reach the hardware.

use crate::audio::{AudioPipeline, DeviceDescriptor, DeviceSnapshot, Direction, GainStage};
use crate::error::{BindingError, PipelineApplyError, StoreError};
use crate::settings::AudioParameters;
use crate::store::{PersistedConfiguration, PreferenceStore};
use crate::validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Bound,
    Applying,
    Failed,
}

/// What one `set_parameters` call did.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Fields the pipeline accepted.
    pub applied: Vec<&'static str>,
    /// Fields the pipeline refused. Non-fatal; persistence still happened.
    pub failures: Vec<PipelineApplyError>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct AudioBindingController {
    pipeline: Box<dyn AudioPipeline>,
    store: PreferenceStore,
    state: BindingState,
    /// State to return to after a failure.
    known_good: BindingState,
    /// Last parameter set pushed to the pipeline.
    applied: Option<AudioParameters>,
    /// Fields the pipeline refused last time; retried on the next apply.
    pending: Vec<&'static str>,
    input: Option<DeviceDescriptor>,
    output: Option<DeviceDescriptor>,
    last_failure: Option<PipelineApplyError>,
}

impl AudioBindingController {
    pub fn new(pipeline: Box<dyn AudioPipeline>, store: PreferenceStore) -> Self {
        Self {
            pipeline,
            store,
            state: BindingState::Unbound,
            known_good: BindingState::Unbound,
            applied: None,
            pending: Vec::new(),
            input: None,
            output: None,
            last_failure: None,
        }
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn bound_device(&self, direction: Direction) -> Option<&DeviceDescriptor> {
        match direction {
            Direction::Input => self.input.as_ref(),
            Direction::Output => self.output.as_ref(),
        }
    }

    /// Whether the pipeline has been given a full parameter set since it
    /// was created or last lost.
    pub fn has_applied_parameters(&self) -> bool {
        self.applied.is_some()
    }

    /// Most recent unrecoverable pipeline error, if any.
    pub fn last_failure(&self) -> Option<&PipelineApplyError> {
        self.last_failure.as_ref()
    }

    pub fn load(&self) -> PersistedConfiguration {
        self.store.load()
    }

    pub fn persist(&mut self, record: &PersistedConfiguration) -> Result<(), StoreError> {
        self.store.save(record).inspect_err(|e| {
            log::warn!("Failed to persist settings: {}", e);
        })
    }

    pub fn select_input_device(
        &mut self,
        device: &DeviceDescriptor,
        present: &DeviceSnapshot,
        record: &PersistedConfiguration,
    ) -> Result<(), BindingError> {
        self.select_device(Direction::Input, device, present, record)
    }

    pub fn select_output_device(
        &mut self,
        device: &DeviceDescriptor,
        present: &DeviceSnapshot,
        record: &PersistedConfiguration,
    ) -> Result<(), BindingError> {
        self.select_device(Direction::Output, device, present, record)
    }

    /// `record` is the configuration to persist once the switch succeeds;
    /// it already carries `device` as the selection.
    fn select_device(
        &mut self,
        direction: Direction,
        device: &DeviceDescriptor,
        present: &DeviceSnapshot,
        record: &PersistedConfiguration,
    ) -> Result<(), BindingError> {
        self.bind_device(direction, device, present)?;
        self.persist(record)?;
        Ok(())
    }

    /// Switch the pipeline to `device` without persisting. Used while the
    /// session restores a configuration it has just read from the store.
    pub fn bind_device(
        &mut self,
        direction: Direction,
        device: &DeviceDescriptor,
        present: &DeviceSnapshot,
    ) -> Result<(), BindingError> {
        if device.direction != direction || !present.contains(device) {
            log::warn!("Refusing {} device '{}': not present", direction, device.id);
            return Err(BindingError::DeviceNotPresent {
                id: device.id.clone(),
                direction,
            });
        }

        self.begin();
        let result = match direction {
            Direction::Input => self.pipeline.set_input_device(&device.id),
            Direction::Output => self.pipeline.set_output_device(&device.id),
        };
        if let Err(e) = result {
            self.fail(&e);
            return Err(e.into());
        }
        match direction {
            Direction::Input => self.input = Some(device.clone()),
            Direction::Output => self.output = Some(device.clone()),
        }
        self.finish();
        log::info!("Bound {} device '{}'", direction, device.id);
        Ok(())
    }

    /// Push every field of `params` that differs from what the pipeline last
    /// accepted, then persist `record` once. Never fails on pipeline errors;
    /// those come back in the report.
    pub fn set_parameters(
        &mut self,
        params: &AudioParameters,
        record: &PersistedConfiguration,
    ) -> Result<ApplyReport, StoreError> {
        let report = self.apply_parameters(params);
        self.persist(record)?;
        Ok(report)
    }

    /// The pipeline half of [`set_parameters`](Self::set_parameters), without persisting.
    pub fn apply_parameters(&mut self, params: &AudioParameters) -> ApplyReport {
        self.apply(&params.clamped())
    }

    fn apply(&mut self, params: &AudioParameters) -> ApplyReport {
        let mut report = ApplyReport::default();
        let previous = self.applied.clone();
        let mut failed: Vec<&'static str> = Vec::new();

        self.begin();

        macro_rules! push {
            ($field:ident, $name:literal, $call:expr) => {
                let changed = self.pending.contains(&$name)
                    || previous.as_ref().is_none_or(|p| p.$field != params.$field);
                if changed {
                    match $call {
                        Ok(()) => report.applied.push($name),
                        Err(e) => {
                            log::warn!("Pipeline did not apply {}: {}", $name, e);
                            failed.push($name);
                            let fatal = !e.is_recoverable();
                            if fatal {
                                self.fail(&e);
                            }
                            report.failures.push(e);
                            if fatal {
                                return report;
                            }
                        }
                    }
                }
            };
        }

        push!(
            microphone_volume,
            "microphone_volume",
            self.pipeline.set_gain(GainStage::MicrophoneVolume, params.microphone_volume)
        );
        push!(
            microphone_boost,
            "microphone_boost",
            self.pipeline.set_gain(GainStage::MicrophoneBoost, params.microphone_boost)
        );
        push!(
            output_volume,
            "output_volume",
            self.pipeline.set_gain(GainStage::OutputVolume, params.output_volume)
        );
        push!(
            noise_suppression_enabled,
            "noise_suppression_enabled",
            self.pipeline.set_noise_suppression(params.noise_suppression_enabled)
        );
        push!(
            noise_threshold,
            "noise_threshold",
            self.pipeline
                .set_noise_threshold(validator::percent_to_fraction(params.noise_threshold))
        );
        push!(
            automatic_gain_control,
            "automatic_gain_control",
            self.pipeline.set_automatic_gain_control(params.automatic_gain_control)
        );
        push!(
            echo_cancellation,
            "echo_cancellation",
            self.pipeline.set_echo_cancellation(params.echo_cancellation)
        );

        self.applied = Some(params.clone());
        self.pending = failed;
        self.finish();
        report
    }

    fn begin(&mut self) {
        if self.state != BindingState::Applying {
            self.known_good = self.state;
        }
        self.state = BindingState::Applying;
    }

    fn finish(&mut self) {
        self.state = BindingState::Bound;
        self.known_good = BindingState::Bound;
    }

    /// Record a failed pipeline call. Rejections leave the binding usable;
    /// a lost pipeline passes through `Failed` and reverts to the last
    /// known-good state. After a loss the pipeline's state is unknown, so
    /// the next apply pushes every field, whichever call noticed the loss.
    fn fail(&mut self, err: &PipelineApplyError) {
        if err.is_recoverable() {
            log::warn!("{}", err);
        } else {
            log::error!("Audio pipeline failed: {}", err);
            self.state = BindingState::Failed;
            self.last_failure = Some(err.clone());
            self.applied = None;
            self.pending.clear();
        }
        self.state = self.known_good;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pipeline::testing::{Call, RecordingPipeline};
    use crate::store::{MemoryMedium, StorageMedium};

    fn controller() -> (AudioBindingController, RecordingPipeline, MemoryMedium) {
        let pipeline = RecordingPipeline::default();
        let medium = MemoryMedium::new();
        let store = PreferenceStore::new(Box::new(medium.clone()));
        (
            AudioBindingController::new(Box::new(pipeline.clone()), store),
            pipeline,
            medium,
        )
    }

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot {
            inputs: vec![DeviceDescriptor::input("mic-a"), DeviceDescriptor::input("mic-b")],
            outputs: vec![DeviceDescriptor::output("spk")],
        }
    }

    #[test]
    fn first_apply_pushes_every_field_and_binds() {
        let (mut c, pipeline, _) = controller();
        assert_eq!(c.state(), BindingState::Unbound);

        let report = c
            .set_parameters(&AudioParameters::default(), &PersistedConfiguration::default())
            .unwrap();
        assert!(report.is_clean());
        assert_eq!(report.applied.len(), 7);
        assert_eq!(pipeline.calls().len(), 7);
        assert_eq!(c.state(), BindingState::Bound);
    }

    #[test]
    fn only_changed_fields_reach_the_pipeline() {
        let (mut c, pipeline, _) = controller();
        let record = PersistedConfiguration::default();
        let mut params = AudioParameters::default();
        c.set_parameters(&params, &record).unwrap();
        pipeline.clear();

        params.noise_threshold = 40.0;
        let report = c.set_parameters(&params, &record).unwrap();
        assert_eq!(report.applied, vec!["noise_threshold"]);
        assert_eq!(pipeline.calls(), vec![Call::NoiseThreshold(0.4)]);

        pipeline.clear();
        c.set_parameters(&params, &record).unwrap();
        assert!(pipeline.calls().is_empty());
    }

    #[test]
    fn rejected_field_does_not_block_the_rest_and_is_retried() {
        let (mut c, pipeline, medium) = controller();
        let record = PersistedConfiguration::default();
        c.set_parameters(&AudioParameters::default(), &record).unwrap();
        pipeline.clear();
        pipeline.reject("microphone_boost");

        let params = AudioParameters {
            microphone_boost: 12.0,
            echo_cancellation: false,
            ..AudioParameters::default()
        };
        let mut intent = record.clone();
        intent.microphone_boost = 12.0;
        let report = c.set_parameters(&params, &intent).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(pipeline.calls(), vec![Call::EchoCancellation(false)]);
        assert_eq!(c.state(), BindingState::Bound);
        assert_eq!(PreferenceStore::new(Box::new(medium)).load().microphone_boost, 12.0);

        pipeline.accept_all();
        pipeline.clear();
        c.set_parameters(&params, &intent).unwrap();
        assert_eq!(pipeline.calls(), vec![Call::Gain(GainStage::MicrophoneBoost, 12.0)]);
    }

    #[test]
    fn disconnect_reverts_to_last_known_good() {
        let (mut c, pipeline, _) = controller();
        let record = PersistedConfiguration::default();
        c.set_parameters(&AudioParameters::default(), &record).unwrap();
        pipeline.disconnect();

        let params = AudioParameters {
            output_volume: 90.0,
            ..AudioParameters::default()
        };
        let report = c.set_parameters(&params, &record).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(c.state(), BindingState::Bound);
        assert!(matches!(c.last_failure(), Some(PipelineApplyError::Disconnected(_))));
    }

    #[test]
    fn device_switch_lost_pipeline_forces_full_push() {
        let (mut c, pipeline, _) = controller();
        let record = PersistedConfiguration::default();
        let mut params = AudioParameters::default();
        c.set_parameters(&params, &record).unwrap();
        assert!(c.has_applied_parameters());
        pipeline.disconnect();

        let err = c
            .select_input_device(&DeviceDescriptor::input("mic-b"), &snapshot(), &record)
            .unwrap_err();
        assert!(matches!(err, BindingError::Pipeline(PipelineApplyError::Disconnected(_))));
        assert!(!c.has_applied_parameters());

        pipeline.reconnect();
        params.microphone_volume = 65.0;
        let report = c.set_parameters(&params, &record).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.applied.len(), 7);
        assert_eq!(pipeline.calls().len(), 14);
    }

    #[test]
    fn absent_device_is_refused_without_touching_pipeline() {
        let (mut c, pipeline, medium) = controller();
        let err = c
            .select_input_device(
                &DeviceDescriptor::input("device-x"),
                &snapshot(),
                &PersistedConfiguration::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BindingError::DeviceNotPresent { .. }));
        assert!(pipeline.calls().is_empty());
        assert!(c.bound_device(Direction::Input).is_none());
        assert!(medium.entries().unwrap().is_empty());
    }

    #[test]
    fn wrong_direction_counts_as_absent() {
        let (mut c, _, _) = controller();
        let err = c
            .select_output_device(
                &DeviceDescriptor::input("mic-a"),
                &snapshot(),
                &PersistedConfiguration::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BindingError::DeviceNotPresent { direction: Direction::Output, .. }));
    }

    #[test]
    fn present_device_switches_then_persists() {
        let (mut c, pipeline, medium) = controller();
        let mut record = PersistedConfiguration::default();
        record.last_input_device = Some("mic-b".into());

        c.select_input_device(&DeviceDescriptor::input("mic-b"), &snapshot(), &record)
            .unwrap();
        assert_eq!(pipeline.calls(), vec![Call::InputDevice("mic-b".into())]);
        assert_eq!(c.bound_device(Direction::Input), Some(&DeviceDescriptor::input("mic-b")));
        assert_eq!(c.state(), BindingState::Bound);
        assert_eq!(
            PreferenceStore::new(Box::new(medium)).load().last_input_device.as_deref(),
            Some("mic-b")
        );
    }

    #[test]
    fn refused_device_switch_keeps_previous_binding() {
        let (mut c, pipeline, _) = controller();
        let record = PersistedConfiguration::default();
        c.select_input_device(&DeviceDescriptor::input("mic-a"), &snapshot(), &record)
            .unwrap();
        pipeline.reject("input_device");

        let err = c
            .select_input_device(&DeviceDescriptor::input("mic-b"), &snapshot(), &record)
            .unwrap_err();
        assert!(matches!(err, BindingError::Pipeline(_)));
        assert_eq!(c.bound_device(Direction::Input), Some(&DeviceDescriptor::input("mic-a")));
        assert_eq!(c.state(), BindingState::Bound);
    }
}
