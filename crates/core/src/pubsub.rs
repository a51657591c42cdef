//! Pub/Sub topic lifecycle, used to receive DICOM store notifications.

use crate::config::CloudConfig;
use crate::http::{endpoint_url, RestClient};
use crate::names::validate_id;
use crate::CloudResult;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct PubSubClient {
    rest: RestClient,
    base: Url,
}

impl PubSubClient {
    /// Creates a client for the Pub/Sub API rooted at `base`, e.g.
    /// `https://pubsub.googleapis.com/v1/`.
    pub fn new(rest: RestClient, base: Url) -> Self {
        Self { rest, base }
    }

    /// Builds a client using the Pub/Sub endpoint from `config`.
    pub fn from_rest(rest: RestClient, config: &CloudConfig) -> Self {
        Self::new(rest, config.endpoints().pubsub().clone())
    }

    fn topic_url(&self, project_id: &str, topic_id: &str) -> CloudResult<Url> {
        validate_id("project id", project_id)?;
        validate_id("topic id", topic_id)?;
        endpoint_url(&self.base, ["projects", project_id, "topics", topic_id])
    }

    /// Creates a topic with default settings.
    ///
    /// # Arguments
    ///
    /// * `project_id` - Project that owns the topic.
    /// * `topic_id` - Short topic id; the full name is `projects/{project_id}/topics/{topic_id}`.
    ///
    /// # Returns
    ///
    /// The created `Topic`, carrying its full name.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `409` when the topic already exists.
    pub async fn create_topic(&self, project_id: &str, topic_id: &str) -> CloudResult<Topic> {
        let url = self.topic_url(project_id, topic_id)?;
        self.rest
            .execute(
                self.rest
                    .request(Method::PUT, url)
                    .json(&serde_json::json!({})),
            )
            .await
    }

    /// Deletes a topic. Subscriptions to it are detached by the service, not deleted.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `404` when the topic does not exist.
    pub async fn delete_topic(&self, project_id: &str, topic_id: &str) -> CloudResult<()> {
        let url = self.topic_url(project_id, topic_id)?;
        self.rest
            .execute_empty(self.rest.request(Method::DELETE, url))
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::names::topic_name;
    use crate::stub::StubServer;
    use crate::CloudClients;

    #[tokio::test]
    async fn topic_lifecycle_against_stub() {
        let stub = StubServer::spawn().unwrap();
        let clients = CloudClients::from_config(&stub.cloud_config().unwrap())
            .await
            .unwrap();

        let topic = clients.pubsub.create_topic("proj", "t").await.unwrap();
        assert_eq!(topic.name, topic_name("proj", "t"));
        assert!(stub.has_topic(&topic.name));

        let err = clients.pubsub.create_topic("proj", "t").await.unwrap_err();
        assert_eq!(err.status(), Some(reqwest::StatusCode::CONFLICT));

        clients.pubsub.delete_topic("proj", "t").await.unwrap();
        assert!(!stub.has_topic(&topic.name));
    }
}
