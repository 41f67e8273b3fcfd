use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

/// Capability answer from the platform's biometric surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCapability {
    Ready,
    /// Hardware exists but is currently unavailable.
    HardwareUnavailable,
    /// The device has no biometric hardware at all.
    NoHardware,
    /// Hardware is present but the user has not enrolled a biometric.
    NotEnrolled,
}

/// Event reported by the platform prompt while it is on screen. A failed
/// attempt is not terminal: the prompt stays open and the user may retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEvent {
    Succeeded,
    FailedAttempt,
    Error(String),
    Canceled,
}

/// Copy shown on the platform authentication prompt.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub title: String,
    pub description: String,
}

impl PromptSpec {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        PromptSpec {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// The opaque platform biometric surface.
///
/// `authenticate` returns immediately after showing the prompt; the
/// platform reports attempts asynchronously over `events` and closes the
/// channel when the prompt is torn down. Each call is a single-shot
/// request ending in exactly one terminal event (`Succeeded`, `Error`,
/// `Canceled`) or channel closure.
pub trait BiometricSensor: Send + Sync {
    fn capability(&self) -> SensorCapability;

    fn authenticate(&self, prompt: &PromptSpec, events: UnboundedSender<SensorEvent>);
}

impl<T: BiometricSensor + ?Sized> BiometricSensor for Arc<T> {
    fn capability(&self) -> SensorCapability {
        (**self).capability()
    }

    fn authenticate(&self, prompt: &PromptSpec, events: UnboundedSender<SensorEvent>) {
        (**self).authenticate(prompt, events)
    }
}
