use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::sensor::{BiometricSensor, PromptSpec, SensorCapability, SensorEvent};

/// Sensor fake that replays one scripted event batch per `authenticate`
/// call. An exhausted script drops the event channel without a terminal
/// event, which is how a torn-down platform prompt behaves.
pub(crate) struct ScriptedSensor {
    capability: SensorCapability,
    calls: Mutex<VecDeque<Vec<SensorEvent>>>,
}

impl ScriptedSensor {
    pub(crate) fn ready(calls: Vec<Vec<SensorEvent>>) -> Self {
        Self::with_capability(SensorCapability::Ready, calls)
    }

    pub(crate) fn with_capability(
        capability: SensorCapability,
        calls: Vec<Vec<SensorEvent>>,
    ) -> Self {
        ScriptedSensor {
            capability,
            calls: Mutex::new(calls.into()),
        }
    }
}

impl BiometricSensor for ScriptedSensor {
    fn capability(&self) -> SensorCapability {
        self.capability
    }

    fn authenticate(&self, _prompt: &PromptSpec, events: UnboundedSender<SensorEvent>) {
        let batch = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        for event in batch.unwrap_or_default() {
            let _ = events.send(event);
        }
    }
}

/// Sensor fake that reports one failed attempt and then keeps the prompt
/// open by holding the event channel, until [`release`](Self::release)
/// tears it down.
pub(crate) struct ParkingSensor {
    parked: Mutex<Option<UnboundedSender<SensorEvent>>>,
}

impl ParkingSensor {
    pub(crate) fn new() -> Self {
        ParkingSensor {
            parked: Mutex::new(None),
        }
    }

    pub(crate) fn release(&self) {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl BiometricSensor for ParkingSensor {
    fn capability(&self) -> SensorCapability {
        SensorCapability::Ready
    }

    fn authenticate(&self, _prompt: &PromptSpec, events: UnboundedSender<SensorEvent>) {
        let _ = events.send(SensorEvent::FailedAttempt);
        *self.parked.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
    }
}
