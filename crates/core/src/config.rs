//! Runtime configuration for the samples.
//!
//! Configuration is resolved once at process startup from a key lookup (normally the process
//! environment after `.env` has been loaded) and then passed explicitly into the clients. Nothing
//! in this crate reads environment variables while talking to a service, which keeps the clients
//! usable from tests that point them at local stubs.

use crate::constants::{
    DEFAULT_CLOUD_REGION, DEFAULT_HEALTHCARE_ENDPOINT, DEFAULT_OPERATION_MAX_POLLS,
    DEFAULT_OPERATION_POLL_MS, DEFAULT_PUBSUB_ENDPOINT, DEFAULT_STORAGE_ENDPOINT,
    ENV_ACCESS_TOKEN, ENV_CREDENTIALS, ENV_HEALTHCARE_ENDPOINT, ENV_OPERATION_MAX_POLLS,
    ENV_OPERATION_POLL_MS, ENV_PROJECT, ENV_PUBSUB_ENDPOINT, ENV_STORAGE_ENDPOINT,
};
use crate::{CloudError, CloudResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Returns the trimmed value for `key`, treating blank values as absent.
fn lookup_non_blank(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Where bearer tokens come from.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialsSource {
    /// A pre-minted OAuth access token.
    AccessToken(String),
    /// A service-account or authorized-user JSON key file.
    File(PathBuf),
}

impl fmt::Debug for CredentialsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialsSource::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            CredentialsSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl CredentialsSource {
    /// Resolve the credentials source.
    ///
    /// An explicit access token wins over a credentials file.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CloudResult<Self> {
        if let Some(token) = lookup_non_blank(&lookup, ENV_ACCESS_TOKEN) {
            return Ok(CredentialsSource::AccessToken(token));
        }
        lookup_non_blank(&lookup, ENV_CREDENTIALS)
            .map(|path| CredentialsSource::File(PathBuf::from(path)))
            .ok_or(CloudError::MissingEnv(ENV_CREDENTIALS))
    }
}

/// Base URLs of the three services the samples talk to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiEndpoints {
    healthcare: Url,
    storage: Url,
    pubsub: Url,
}

impl ApiEndpoints {
    pub fn new(healthcare: Url, storage: Url, pubsub: Url) -> CloudResult<Self> {
        for url in [&healthcare, &storage, &pubsub] {
            validate_endpoint(url)?;
        }
        Ok(Self {
            healthcare,
            storage,
            pubsub,
        })
    }

    /// Point every service at the same base URL. Used by tests running a single stub.
    pub fn single(base: Url) -> CloudResult<Self> {
        Self::new(base.clone(), base.clone(), base)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CloudResult<Self> {
        let parse = |key: &'static str, default: &str| -> CloudResult<Url> {
            let raw = lookup_non_blank(&lookup, key).unwrap_or_else(|| default.to_string());
            Url::parse(&raw).map_err(|e| CloudError::InvalidConfig(format!("{key}: {e}")))
        };

        Self::new(
            parse(ENV_HEALTHCARE_ENDPOINT, DEFAULT_HEALTHCARE_ENDPOINT)?,
            parse(ENV_STORAGE_ENDPOINT, DEFAULT_STORAGE_ENDPOINT)?,
            parse(ENV_PUBSUB_ENDPOINT, DEFAULT_PUBSUB_ENDPOINT)?,
        )
    }

    pub fn healthcare(&self) -> &Url {
        &self.healthcare
    }

    pub fn storage(&self) -> &Url {
        &self.storage
    }

    pub fn pubsub(&self) -> &Url {
        &self.pubsub
    }
}

fn validate_endpoint(url: &Url) -> CloudResult<()> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CloudError::InvalidConfig(format!(
            "endpoint must be http or https: {url}"
        )));
    }
    if url.cannot_be_a_base() {
        return Err(CloudError::InvalidConfig(format!(
            "endpoint cannot be used as a base URL: {url}"
        )));
    }
    Ok(())
}

/// How long-running operations are polled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationPolling {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for OperationPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_OPERATION_POLL_MS),
            max_polls: DEFAULT_OPERATION_MAX_POLLS,
        }
    }
}

impl OperationPolling {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CloudResult<Self> {
        let interval_ms = match lookup_non_blank(&lookup, ENV_OPERATION_POLL_MS) {
            Some(v) => v.parse::<u64>().map_err(|e| {
                CloudError::InvalidConfig(format!("{ENV_OPERATION_POLL_MS}: {e}"))
            })?,
            None => DEFAULT_OPERATION_POLL_MS,
        };
        let max_polls = match lookup_non_blank(&lookup, ENV_OPERATION_MAX_POLLS) {
            Some(v) => v.parse::<u32>().map_err(|e| {
                CloudError::InvalidConfig(format!("{ENV_OPERATION_MAX_POLLS}: {e}"))
            })?,
            None => DEFAULT_OPERATION_MAX_POLLS,
        };
        if max_polls == 0 {
            return Err(CloudError::InvalidConfig(format!(
                "{ENV_OPERATION_MAX_POLLS} must be at least 1"
            )));
        }

        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            max_polls,
        })
    }
}

/// Configuration shared by every client.
#[derive(Clone, Debug)]
pub struct CloudConfig {
    credentials: CredentialsSource,
    endpoints: ApiEndpoints,
    polling: OperationPolling,
}

impl CloudConfig {
    pub fn new(
        credentials: CredentialsSource,
        endpoints: ApiEndpoints,
        polling: OperationPolling,
    ) -> Self {
        Self {
            credentials,
            endpoints,
            polling,
        }
    }

    /// Resolve the configuration from a key lookup, e.g. `|k| std::env::var(k).ok()`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CloudResult<Self> {
        Ok(Self {
            credentials: CredentialsSource::from_lookup(&lookup)?,
            endpoints: ApiEndpoints::from_lookup(&lookup)?,
            polling: OperationPolling::from_lookup(&lookup)?,
        })
    }

    pub fn credentials(&self) -> &CredentialsSource {
        &self.credentials
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    pub fn polling(&self) -> OperationPolling {
        self.polling
    }
}

/// Configuration of the end-to-end DICOM store suite.
///
/// Both `GCLOUD_PROJECT` and `GOOGLE_APPLICATION_CREDENTIALS` must be present, even when an
/// access token override is also supplied.
#[derive(Clone, Debug)]
pub struct SuiteConfig {
    project_id: String,
    cloud_region: String,
    credentials_path: PathBuf,
    cloud: CloudConfig,
}

impl SuiteConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CloudResult<Self> {
        let project_id =
            lookup_non_blank(&lookup, ENV_PROJECT).ok_or(CloudError::MissingEnv(ENV_PROJECT))?;
        let credentials_path = lookup_non_blank(&lookup, ENV_CREDENTIALS)
            .map(PathBuf::from)
            .ok_or(CloudError::MissingEnv(ENV_CREDENTIALS))?;

        Ok(Self {
            project_id,
            cloud_region: DEFAULT_CLOUD_REGION.to_string(),
            credentials_path,
            cloud: CloudConfig::from_lookup(&lookup)?,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn cloud_region(&self) -> &str {
        &self.cloud_region
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    pub fn cloud(&self) -> &CloudConfig {
        &self.cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn access_token_wins_over_credentials_file() {
        let lookup = lookup_from(&[
            (ENV_ACCESS_TOKEN, "ya29.token"),
            (ENV_CREDENTIALS, "/tmp/key.json"),
        ]);
        let source = CredentialsSource::from_lookup(lookup).unwrap();
        assert_eq!(source, CredentialsSource::AccessToken("ya29.token".into()));
    }

    #[test]
    fn blank_token_falls_back_to_file() {
        let lookup = lookup_from(&[(ENV_ACCESS_TOKEN, "   "), (ENV_CREDENTIALS, "/tmp/key.json")]);
        let source = CredentialsSource::from_lookup(lookup).unwrap();
        assert_eq!(source, CredentialsSource::File("/tmp/key.json".into()));
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let err = CredentialsSource::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, CloudError::MissingEnv(ENV_CREDENTIALS)));
    }

    #[test]
    fn access_token_is_redacted_in_debug_output() {
        let source = CredentialsSource::AccessToken("secret".into());
        assert!(!format!("{source:?}").contains("secret"));
    }

    #[test]
    fn endpoints_default_to_google_apis() {
        let endpoints = ApiEndpoints::from_lookup(|_| None).unwrap();
        assert_eq!(endpoints.healthcare().as_str(), DEFAULT_HEALTHCARE_ENDPOINT);
        assert_eq!(endpoints.storage().as_str(), DEFAULT_STORAGE_ENDPOINT);
        assert_eq!(endpoints.pubsub().as_str(), DEFAULT_PUBSUB_ENDPOINT);
    }

    #[test]
    fn endpoint_overrides_are_parsed() {
        let lookup = lookup_from(&[(ENV_HEALTHCARE_ENDPOINT, "http://127.0.0.1:9000/v1/")]);
        let endpoints = ApiEndpoints::from_lookup(lookup).unwrap();
        assert_eq!(endpoints.healthcare().as_str(), "http://127.0.0.1:9000/v1/");
    }

    #[test]
    fn endpoint_with_unsupported_scheme_is_rejected() {
        let lookup = lookup_from(&[(ENV_PUBSUB_ENDPOINT, "ftp://example.com/")]);
        let err = ApiEndpoints::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[test]
    fn polling_overrides_are_parsed() {
        let lookup = lookup_from(&[(ENV_OPERATION_POLL_MS, "5"), (ENV_OPERATION_MAX_POLLS, "3")]);
        let polling = OperationPolling::from_lookup(lookup).unwrap();
        assert_eq!(polling.interval, Duration::from_millis(5));
        assert_eq!(polling.max_polls, 3);
    }

    #[test]
    fn zero_max_polls_is_rejected() {
        let lookup = lookup_from(&[(ENV_OPERATION_MAX_POLLS, "0")]);
        assert!(OperationPolling::from_lookup(lookup).is_err());
    }

    #[test]
    fn suite_requires_project() {
        let lookup = lookup_from(&[(ENV_CREDENTIALS, "/tmp/key.json")]);
        let err = SuiteConfig::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, CloudError::MissingEnv(ENV_PROJECT)));
    }

    #[test]
    fn suite_requires_credentials_even_with_token() {
        let lookup = lookup_from(&[(ENV_PROJECT, "my-project"), (ENV_ACCESS_TOKEN, "tok")]);
        let err = SuiteConfig::from_lookup(lookup).unwrap_err();
        assert!(matches!(err, CloudError::MissingEnv(ENV_CREDENTIALS)));
    }

    #[test]
    fn suite_config_resolves() {
        let lookup = lookup_from(&[(ENV_PROJECT, "my-project"), (ENV_CREDENTIALS, "/k.json")]);
        let cfg = SuiteConfig::from_lookup(lookup).unwrap();
        assert_eq!(cfg.project_id(), "my-project");
        assert_eq!(cfg.cloud_region(), DEFAULT_CLOUD_REGION);
        assert_eq!(cfg.credentials_path(), Path::new("/k.json"));
    }
}
