//! # Samples Core
//!
//! Everything the healthcare samples share:
//! - Configuration resolved once at startup (`config`)
//! - OAuth credentials and token minting (`auth`)
//! - Thin REST clients for the Healthcare, Cloud Storage and Pub/Sub APIs
//! - Resource names and throwaway identifiers (`names`)
//! - Setup/teardown of the DICOM store suite's resources (`fixture`)
//!
//! **No presentation concerns**: printing sample output belongs in the `dicom` CLI, HTTP
//! routing in `samples-web`.

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod fixture;
pub mod healthcare;
pub mod http;
pub mod names;
pub mod pubsub;
pub mod storage;

#[cfg(any(test, feature = "stub"))]
pub mod stub;

pub use config::{ApiEndpoints, CloudConfig, CredentialsSource, OperationPolling, SuiteConfig};
pub use error::{CloudError, CloudResult};
pub use fixture::Fixture;
pub use healthcare::HealthcareClient;
pub use names::{DatasetName, DicomStoreName, TestResources};
pub use pubsub::PubSubClient;
pub use storage::StorageClient;

use http::RestClient;

/// The three service clients, sharing one HTTP connection pool and token cache.
#[derive(Clone, Debug)]
pub struct CloudClients {
    pub healthcare: HealthcareClient,
    pub storage: StorageClient,
    pub pubsub: PubSubClient,
}

impl CloudClients {
    pub fn new(rest: RestClient, config: &CloudConfig) -> Self {
        Self {
            healthcare: HealthcareClient::from_rest(rest.clone(), config),
            storage: StorageClient::from_rest(rest.clone(), config),
            pubsub: PubSubClient::from_rest(rest, config),
        }
    }

    /// Load credentials and build all clients.
    pub async fn from_config(config: &CloudConfig) -> CloudResult<Self> {
        let rest = RestClient::from_config(config).await?;
        Ok(Self::new(rest, config))
    }
}
