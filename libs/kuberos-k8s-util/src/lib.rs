pub mod client;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod url;

pub use error::Error;
pub use executor::{KubernetesExecutor, OpResult, PodObservedStatus, PodView, ServiceView};
