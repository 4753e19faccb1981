use thiserror::Error;

/// Stable reason codes surfaced to the operator-facing error envelope
/// (spec §6/§7). Kept separate from the `Error` message so the HTTP layer
/// (out of scope here) never has to pattern-match on free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    ClusterNotReachable,
    Unauthorized,
    NotFound,
    FailedToCreateConfigMap,
    FailedToDeleteConfigMap,
    FailedToCreatePod,
    FailedToDeletePod,
    FailedToCreateDDSServer,
    ValidationFailed,
    Other,
}

/// Errors normalised out of the raw Kubernetes API client, per spec §4.2:
/// "Unauthorized" becomes an invalid/expired token, connection failures
/// become "cluster is not reachable", and "Not Found" on delete never
/// reaches this type at all (the executor treats it as success there).
#[derive(Debug, Error)]
pub enum Error {
    #[error("cluster service account token is invalid or expired")]
    Unauthorized,

    #[error("cluster is not reachable: {0}")]
    ClusterNotReachable(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{reason}: {message}")]
    Operation {
        reason: ReasonCode,
        message: String,
        verbose: Option<String>,
    },
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReasonCode::ClusterNotReachable => "ClusterNotReachable",
            ReasonCode::Unauthorized => "Unauthorized",
            ReasonCode::NotFound => "NotFound",
            ReasonCode::FailedToCreateConfigMap => "FailedToCreateConfigMap",
            ReasonCode::FailedToDeleteConfigMap => "FailedToDeleteConfigMap",
            ReasonCode::FailedToCreatePod => "FailedToCreatePod",
            ReasonCode::FailedToDeletePod => "FailedToDeletePod",
            ReasonCode::FailedToCreateDDSServer => "FailedToCreateDDSServer",
            ReasonCode::ValidationFailed => "ValidationFailed",
            ReasonCode::Other => "Other",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Classifies a raw `kube::Error` the way `kuberos_executer.py`'s
    /// `ExecutionResponse.parse_error_reason` does.
    pub fn from_kube(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(api_err) if api_err.reason == "Unauthorized" => Error::Unauthorized,
            kube::Error::Service(_) => Error::ClusterNotReachable(err.to_string()),
            _ => Error::Kube(err),
        }
    }

    pub fn reason(&self) -> ReasonCode {
        match self {
            Error::Unauthorized => ReasonCode::Unauthorized,
            Error::ClusterNotReachable(_) => ReasonCode::ClusterNotReachable,
            Error::Kube(_) => ReasonCode::Other,
            Error::Operation { reason, .. } => *reason,
        }
    }

    /// `true` when the underlying Kubernetes error is a 404. Delete
    /// operations treat this as success rather than failure (spec §4.2).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// `true` for transport/auth failures — the cluster never got a chance
    /// to accept or reject the request. Callers must surface these as
    /// `OpResult::Failed`, never `OpResult::Rejected` (spec §4.2: rejected
    /// means "the cluster refused a well-formed request", not "unreachable").
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::ClusterNotReachable(_))
    }
}
