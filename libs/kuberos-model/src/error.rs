use thiserror::Error;

/// Stable reason codes from spec §7. These are matched against by the
/// (out-of-scope) HTTP layer to pick a status code and render
/// `{status, data, errors, msgs}` — never derived from `Display` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    InvalidDeploymentManifest,
    DeploymentAlreadyExists,
    DeploymentDoesNotExist,
    FleetDoesNotExist,
    FleetAlreadyExists,
    FleetInUse,
    FleetResourceCheckFailed,
    ClusterNotReachable,
    ClusterAlreadyRegistered,
    ClusterDoesNotExist,
    ClusterInUse,
    ClusterNodeNotAvailable,
    ValidationFailed,
    FailedToCreateConfigMap,
    FailedToDeleteConfigMap,
    FailedToCreatePod,
    FailedToDeletePod,
    FailedToCreateDDSServer,
    BatchJobDeploymentNotExist,
    BatchJobNotRunning,
    BatchJobNotInStoppedStatus,
    InvalidCommand,
    RegistryTokenDoesNotExist,
}

#[derive(Debug, Error)]
#[error("{reason:?}: {message}")]
pub struct ModelError {
    pub reason: ReasonCode,
    pub message: String,
}

impl ModelError {
    pub fn new(reason: ReasonCode, message: impl Into<String>) -> Self {
        ModelError {
            reason,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
