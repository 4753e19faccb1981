use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("model error: {0}")]
    Model(#[from] kuberos_model::ModelError),

    #[error("kubernetes executor error: {0}")]
    K8s(#[from] kuberos_k8s_util::Error),

    #[error("cluster {0} rejected the request: {1}")]
    Rejected(String, String),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Coarse label for the `failures` metric, kept separate from the
    /// full `Display` text so the cardinality stays bounded.
    pub fn metric_label(&self) -> String {
        match self {
            Error::Model(_) => "model".to_string(),
            Error::K8s(_) => "k8s".to_string(),
            Error::Rejected(..) => "rejected".to_string(),
            Error::NotFound(_) => "not_found".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
