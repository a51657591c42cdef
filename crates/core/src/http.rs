//! Authenticated JSON-over-HTTP plumbing shared by the service clients.

use crate::auth::{Authenticator, Credentials};
use crate::config::CloudConfig;
use crate::{CloudError, CloudResult};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

/// Append path segments to a base URL, percent-encoding each segment.
pub fn endpoint_url<I>(base: &Url, segments: I) -> CloudResult<Url>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| CloudError::InvalidConfig(format!("endpoint cannot be a base URL: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// An HTTP client that attaches a bearer token to every request and maps non-success
/// responses to [`CloudError::Api`].
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    auth: Arc<Authenticator>,
}

impl RestClient {
    pub fn new(http: reqwest::Client, auth: Arc<Authenticator>) -> Self {
        Self { http, auth }
    }

    /// Build a client from configuration, loading credentials from disk when needed.
    pub async fn from_config(config: &CloudConfig) -> CloudResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("healthcare-samples/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let credentials = Credentials::load(config.credentials()).await?;
        let auth = Arc::new(Authenticator::new(http.clone(), credentials));
        Ok(Self::new(http, auth))
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// Send the request and decode a JSON body.
    pub async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> CloudResult<T> {
        let response = self.send(builder).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(CloudError::Decode)
    }

    /// Send the request and discard the body.
    pub async fn execute_empty(&self, builder: RequestBuilder) -> CloudResult<()> {
        self.send(builder).await.map(|_| ())
    }

    async fn send(&self, builder: RequestBuilder) -> CloudResult<reqwest::Response> {
        let token = self.auth.token().await?;
        let request = builder.bearer_auth(token).build()?;
        let method = request.method().clone();
        let url = request.url().to_string();
        tracing::debug!("{} {}", method, url);

        let response = self.http.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!("{} {} returned {}", method, url, status);
        Err(CloudError::Api {
            method,
            url,
            status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_appends_segments_to_base_path() {
        let base = Url::parse("https://healthcare.googleapis.com/v1/").unwrap();
        let url = endpoint_url(&base, ["projects", "p", "locations", "l"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://healthcare.googleapis.com/v1/projects/p/locations/l"
        );
    }

    #[test]
    fn endpoint_url_works_without_trailing_slash() {
        let base = Url::parse("http://127.0.0.1:8080").unwrap();
        let url = endpoint_url(&base, ["storage", "v1", "b"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/storage/v1/b");
    }

    #[test]
    fn endpoint_url_escapes_segments() {
        let base = Url::parse("https://storage.googleapis.com/").unwrap();
        let url = endpoint_url(&base, ["b", "bucket", "o", "dir/file name.dcm"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/b/bucket/o/dir%2Ffile%20name.dcm"
        );
    }

    #[test]
    fn endpoint_url_keeps_method_suffix() {
        let base = Url::parse("https://healthcare.googleapis.com/v1/").unwrap();
        let url = endpoint_url(&base, ["dicomStores", "store:import"]).unwrap();
        assert!(url.as_str().ends_with("/dicomStores/store:import"));
    }
}
