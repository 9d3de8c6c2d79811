//! Audio device enumeration.
//!
//! Every call to [`DeviceRegistry::refresh`] re-queries the backend; devices
//! come and go, so nothing is cached across enumerations except the most
//! recent snapshot, which is what selections are checked against.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the pipeline a device sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// One enumerated device. Identity is the backend identifier string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub direction: Direction,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, direction: Direction) -> Self {
        Self {
            id: id.into(),
            direction,
        }
    }

    pub fn input(id: impl Into<String>) -> Self {
        Self::new(id, Direction::Input)
    }

    pub fn output(id: impl Into<String>) -> Self {
        Self::new(id, Direction::Output)
    }
}

/// Platform hook that lists devices for one direction.
///
/// Implementations may be slow (they talk to hardware) and may fail; the
/// registry turns failures into empty lists.
pub trait DeviceEnumerator: Send {
    fn enumerate(&self, direction: Direction) -> anyhow::Result<Vec<DeviceDescriptor>>;
}

/// Fixed device list, for headless runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticEnumerator {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl StaticEnumerator {
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }
}

impl DeviceEnumerator for StaticEnumerator {
    fn enumerate(&self, direction: Direction) -> anyhow::Result<Vec<DeviceDescriptor>> {
        let ids = match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        };
        Ok(ids
            .iter()
            .map(|id| DeviceDescriptor::new(id.clone(), direction))
            .collect())
    }
}

/// One consistent enumeration of both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub inputs: Vec<DeviceDescriptor>,
    pub outputs: Vec<DeviceDescriptor>,
}

impl DeviceSnapshot {
    pub fn devices(&self, direction: Direction) -> &[DeviceDescriptor] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    pub fn contains(&self, device: &DeviceDescriptor) -> bool {
        self.devices(device.direction)
            .iter()
            .any(|d| d.id == device.id)
    }

    /// Look up a device by identifier.
    pub fn find(&self, direction: Direction, id: &str) -> Option<&DeviceDescriptor> {
        self.devices(direction).iter().find(|d| d.id == id)
    }
}

pub struct DeviceRegistry {
    enumerator: Box<dyn DeviceEnumerator>,
    last: DeviceSnapshot,
}

impl DeviceRegistry {
    pub fn new(enumerator: Box<dyn DeviceEnumerator>) -> Self {
        Self {
            enumerator,
            last: DeviceSnapshot::default(),
        }
    }

    pub fn list_input_devices(&mut self) -> Vec<DeviceDescriptor> {
        self.last.inputs = self.query(Direction::Input);
        self.last.inputs.clone()
    }

    pub fn list_output_devices(&mut self) -> Vec<DeviceDescriptor> {
        self.last.outputs = self.query(Direction::Output);
        self.last.outputs.clone()
    }

    /// Re-enumerate both directions and return the new snapshot.
    pub fn refresh(&mut self) -> DeviceSnapshot {
        self.last = DeviceSnapshot {
            inputs: self.query(Direction::Input),
            outputs: self.query(Direction::Output),
        };
        log::info!(
            "Enumerated {} input and {} output devices",
            self.last.inputs.len(),
            self.last.outputs.len()
        );
        self.last.clone()
    }

    /// The most recent enumeration, without touching the backend.
    pub fn last_snapshot(&self) -> &DeviceSnapshot {
        &self.last
    }

    fn query(&self, direction: Direction) -> Vec<DeviceDescriptor> {
        match self.enumerator.enumerate(direction) {
            Ok(devices) => devices
                .into_iter()
                .filter(|d| d.direction == direction)
                .collect(),
            Err(e) => {
                log::warn!("Failed to enumerate {} devices: {:#}", direction, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEnumerator;

    impl DeviceEnumerator for FailingEnumerator {
        fn enumerate(&self, _direction: Direction) -> anyhow::Result<Vec<DeviceDescriptor>> {
            anyhow::bail!("no sound server")
        }
    }

    #[test]
    fn static_enumerator_lists_each_direction() {
        let mut registry =
            DeviceRegistry::new(Box::new(StaticEnumerator::new(["mic-a", "mic-b"], ["spk"])));

        let inputs = registry.list_input_devices();
        assert_eq!(inputs, vec![DeviceDescriptor::input("mic-a"), DeviceDescriptor::input("mic-b")]);

        let outputs = registry.list_output_devices();
        assert_eq!(outputs, vec![DeviceDescriptor::output("spk")]);
    }

    #[test]
    fn backend_failure_yields_empty_lists() {
        let mut registry = DeviceRegistry::new(Box::new(FailingEnumerator));
        assert!(registry.list_input_devices().is_empty());
        assert!(registry.refresh().outputs.is_empty());
    }

    #[test]
    fn snapshot_tracks_latest_enumeration() {
        let mut registry =
            DeviceRegistry::new(Box::new(StaticEnumerator::new(["mic"], Vec::<String>::new())));
        assert!(registry.last_snapshot().inputs.is_empty());

        registry.refresh();
        let snapshot = registry.last_snapshot();
        assert!(snapshot.contains(&DeviceDescriptor::input("mic")));
        assert!(!snapshot.contains(&DeviceDescriptor::output("mic")));
        assert!(snapshot.find(Direction::Input, "mic").is_some());
    }

    #[test]
    fn direction_display() {
        assert_eq!(Direction::Input.to_string(), "input");
        assert_eq!(Direction::Output.to_string(), "output");
    }
}
