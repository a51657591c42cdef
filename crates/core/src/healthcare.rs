//! Cloud Healthcare API client: datasets, DICOM stores, IAM policies and bulk
//! import/export.
//!
//! Every method is a single REST call (plus operation polling where the API answers with a
//! long-running operation). Ordering constraints such as "a store must exist before it can be
//! patched" are enforced by the service, not here.

use crate::config::{CloudConfig, OperationPolling};
use crate::http::{endpoint_url, RestClient};
use crate::names::{DatasetName, DicomStoreName};
use crate::{CloudError, CloudResult};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub pubsub_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_for_bulk_import: Option<bool>,
}

/// A DICOM store as returned by the API. Fields this crate does not use are kept in `extra`
/// so printing a store shows everything the service sent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DicomStore {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_config: Option<NotificationConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DicomStoreList {
    #[serde(default)]
    pub dicom_stores: Vec<DicomStore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDicomStoresPage {
    #[serde(default)]
    dicom_stores: Vec<DicomStore>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// One role grant. A binding with a `condition` only applies while the condition holds, so it is
/// never reused for unconditional grants.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An IAM policy. Fields this crate does not model (`auditConfigs` and the like) are kept in
/// `extra` so a read-modify-write sends them back unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Policy {
    /// Grants `role` to `member` unconditionally.
    ///
    /// Reuses the unconditional binding for `role` when there is one; conditional bindings for
    /// the same role are left untouched.
    ///
    /// # Arguments
    ///
    /// * `role` - Role to grant, e.g. `roles/viewer`.
    /// * `member` - Principal, e.g. `group:dpebot@google.com`.
    ///
    /// # Returns
    ///
    /// `false` when the member already held the role unconditionally, `true` otherwise.
    pub fn add_member(&mut self, role: &str, member: &str) -> bool {
        match self
            .bindings
            .iter_mut()
            .find(|b| b.role == role && b.condition.is_none())
        {
            Some(binding) if binding.members.iter().any(|m| m == member) => false,
            Some(binding) => {
                binding.members.push(member.to_string());
                true
            }
            None => {
                self.bindings.push(Binding {
                    role: role.to_string(),
                    members: vec![member.to_string()],
                    ..Binding::default()
                });
                true
            }
        }
    }

    /// Whether `member` holds `role` through any binding, conditional or not.
    pub fn has_member(&self, role: &str, member: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.role == role && b.members.iter().any(|m| m == member))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Operation {
    /// Converts a finished operation carrying an error into [`CloudError::Operation`].
    pub fn into_result(self) -> CloudResult<Self> {
        if let (true, Some(status)) = (self.done, self.error.as_ref()) {
            return Err(CloudError::Operation {
                name: self.name.clone(),
                code: status.code,
                message: status.message.clone(),
            });
        }
        Ok(self)
    }
}

#[derive(Clone, Debug)]
pub struct HealthcareClient {
    rest: RestClient,
    base: Url,
    polling: OperationPolling,
}

impl HealthcareClient {
    /// Creates a client for the Healthcare API rooted at `base`.
    ///
    /// # Arguments
    ///
    /// * `rest` - Authenticated HTTP client.
    /// * `base` - API root including the version, e.g. `https://healthcare.googleapis.com/v1/`.
    /// * `polling` - How long-running operations are awaited.
    pub fn new(rest: RestClient, base: Url, polling: OperationPolling) -> Self {
        Self {
            rest,
            base,
            polling,
        }
    }

    /// Builds a client using the healthcare endpoint and polling settings from `config`.
    pub fn from_rest(rest: RestClient, config: &CloudConfig) -> Self {
        Self::new(rest, config.endpoints().healthcare().clone(), config.polling())
    }

    fn url<I>(&self, segments: I) -> CloudResult<Url>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        endpoint_url(&self.base, segments)
    }

    // Datasets

    /// Creates a dataset and waits for the creation operation to finish.
    ///
    /// # Arguments
    ///
    /// * `dataset` - Full name of the dataset to create.
    ///
    /// # Returns
    ///
    /// The created `Dataset`, taken from the operation response.
    ///
    /// # Errors
    ///
    /// Returns a `CloudError` if:
    /// - the API rejects the request (e.g. the dataset already exists),
    /// - the operation finishes with an error or exceeds the poll limit.
    pub async fn create_dataset(&self, dataset: &DatasetName) -> CloudResult<Dataset> {
        let mut url = self.url(dataset.collection_segments())?;
        url.query_pairs_mut().append_pair("datasetId", dataset.dataset_id());

        let operation: Operation = self
            .rest
            .execute(self.rest.request(Method::POST, url).json(&Value::Object(Map::new())))
            .await?;
        let finished = self.wait_for_operation(operation).await?;

        match finished.response {
            Some(response) => serde_json::from_value(response).map_err(CloudError::Decode),
            None => self.get_dataset(dataset).await,
        }
    }

    /// Fetches a dataset.
    pub async fn get_dataset(&self, dataset: &DatasetName) -> CloudResult<Dataset> {
        let url = self.url(dataset.segments())?;
        self.rest.execute(self.rest.request(Method::GET, url)).await
    }

    /// Deletes a dataset together with every store in it.
    pub async fn delete_dataset(&self, dataset: &DatasetName) -> CloudResult<()> {
        let url = self.url(dataset.segments())?;
        self.rest
            .execute_empty(self.rest.request(Method::DELETE, url))
            .await
    }

    // DICOM stores

    /// Creates an empty DICOM store in an existing dataset.
    ///
    /// # Arguments
    ///
    /// * `store` - Full name of the store; its dataset must already exist.
    ///
    /// # Returns
    ///
    /// The `DicomStore` as stored by the service.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `404` when the dataset is missing and `409` when the store
    /// already exists.
    pub async fn create_dicom_store(&self, store: &DicomStoreName) -> CloudResult<DicomStore> {
        let mut segments = store.dataset().segments().to_vec();
        segments.push("dicomStores");
        let mut url = self.url(segments)?;
        url.query_pairs_mut()
            .append_pair("dicomStoreId", store.dicom_store_id());

        self.rest
            .execute(self.rest.request(Method::POST, url).json(&DicomStore::default()))
            .await
    }

    /// Fetches a DICOM store.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `404` when the store does not exist.
    pub async fn get_dicom_store(&self, store: &DicomStoreName) -> CloudResult<DicomStore> {
        let url = self.url(store.segments())?;
        self.rest.execute(self.rest.request(Method::GET, url)).await
    }

    /// Points the store's notifications at a Pub/Sub topic.
    ///
    /// Only `notificationConfig` is updated; other store settings are left as they are.
    ///
    /// # Arguments
    ///
    /// * `store` - Full name of an existing store.
    /// * `pubsub_topic` - Full topic name, `projects/{p}/topics/{t}`.
    ///
    /// # Returns
    ///
    /// The updated `DicomStore`.
    pub async fn patch_dicom_store(
        &self,
        store: &DicomStoreName,
        pubsub_topic: &str,
    ) -> CloudResult<DicomStore> {
        let mut url = self.url(store.segments())?;
        url.query_pairs_mut()
            .append_pair("updateMask", "notificationConfig");
        let body = DicomStore {
            notification_config: Some(NotificationConfig {
                pubsub_topic: pubsub_topic.to_string(),
                send_for_bulk_import: None,
            }),
            ..DicomStore::default()
        };

        self.rest
            .execute(self.rest.request(Method::PATCH, url).json(&body))
            .await
    }

    /// List every store in the dataset, following page tokens.
    pub async fn list_dicom_stores(&self, dataset: &DatasetName) -> CloudResult<DicomStoreList> {
        let mut segments = dataset.segments().to_vec();
        segments.push("dicomStores");
        let base = self.url(segments)?;

        let mut list = DicomStoreList::default();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = base.clone();
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: ListDicomStoresPage =
                self.rest.execute(self.rest.request(Method::GET, url)).await?;
            list.dicom_stores.extend(page.dicom_stores);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(list),
            }
        }
    }

    /// Deletes a DICOM store and the instances in it.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `404` when the store does not exist.
    pub async fn delete_dicom_store(&self, store: &DicomStoreName) -> CloudResult<()> {
        let url = self.url(store.segments())?;
        self.rest
            .execute_empty(self.rest.request(Method::DELETE, url))
            .await
    }

    // IAM

    /// Reads the store's IAM policy, including its etag.
    pub async fn get_dicom_store_iam_policy(&self, store: &DicomStoreName) -> CloudResult<Policy> {
        let url = self.url(store.method_segments("getIamPolicy"))?;
        self.rest.execute(self.rest.request(Method::GET, url)).await
    }

    /// Replaces the store's IAM policy.
    ///
    /// # Arguments
    ///
    /// * `store` - Full name of an existing store.
    /// * `policy` - Policy to write. When it carries an etag the write only succeeds if the
    ///   stored policy still has that etag.
    ///
    /// # Returns
    ///
    /// The policy as stored, with its new etag.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `409` when the etag is stale.
    pub async fn set_dicom_store_iam_policy(
        &self,
        store: &DicomStoreName,
        policy: &Policy,
    ) -> CloudResult<Policy> {
        let url = self.url(store.method_segments("setIamPolicy"))?;
        let body = serde_json::json!({ "policy": policy });
        self.rest
            .execute(self.rest.request(Method::POST, url).json(&body))
            .await
    }

    /// Read-modify-write: adds `member` to `role` and writes the policy back with the etag that
    /// was read, so a concurrent change makes the write fail instead of being overwritten.
    ///
    /// Bindings with conditions, and policy fields this crate does not model, are written back
    /// unchanged.
    ///
    /// # Returns
    ///
    /// The policy as stored after the write.
    pub async fn add_dicom_store_iam_member(
        &self,
        store: &DicomStoreName,
        member: &str,
        role: &str,
    ) -> CloudResult<Policy> {
        let mut policy = self.get_dicom_store_iam_policy(store).await?;
        if !policy.add_member(role, member) {
            tracing::info!("{} already has {} on {}", member, role, store);
        }
        self.set_dicom_store_iam_policy(store, &policy).await
    }

    // Import / export

    /// Imports instances from `gs://bucket/path` (wildcards allowed) and waits for completion.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Operation` when the import fails, e.g. because nothing matched
    /// `gcs_uri`.
    pub async fn import_dicom_instances(
        &self,
        store: &DicomStoreName,
        gcs_uri: &str,
    ) -> CloudResult<Operation> {
        let url = self.url(store.method_segments("import"))?;
        let body = serde_json::json!({ "gcsSource": { "uri": gcs_uri } });
        let operation: Operation = self
            .rest
            .execute(self.rest.request(Method::POST, url).json(&body))
            .await?;
        self.wait_for_operation(operation).await
    }

    /// Exports every instance in the store under `gs://bucket[/prefix]` and waits for
    /// completion.
    pub async fn export_dicom_instances(
        &self,
        store: &DicomStoreName,
        uri_prefix: &str,
    ) -> CloudResult<Operation> {
        let url = self.url(store.method_segments("export"))?;
        let body = serde_json::json!({ "gcsDestination": { "uriPrefix": uri_prefix } });
        let operation: Operation = self
            .rest
            .execute(self.rest.request(Method::POST, url).json(&body))
            .await?;
        self.wait_for_operation(operation).await
    }

    // Operations

    /// Fetches a long-running operation by its full name.
    pub async fn get_operation(&self, name: &str) -> CloudResult<Operation> {
        let url = self.url(name.split('/').filter(|s| !s.is_empty()))?;
        self.rest.execute(self.rest.request(Method::GET, url)).await
    }

    /// Poll until the operation is done. A finished operation with an error becomes
    /// [`CloudError::Operation`].
    pub async fn wait_for_operation(&self, operation: Operation) -> CloudResult<Operation> {
        let mut current = operation;
        let mut polls = 0u32;
        while !current.done {
            if polls >= self.polling.max_polls {
                return Err(CloudError::OperationTimeout {
                    name: current.name,
                    polls,
                });
            }
            tokio::time::sleep(self.polling.interval).await;
            polls += 1;
            current = self.get_operation(&current.name).await?;
            tracing::debug!(
                "operation {} done={} after {} polls",
                current.name,
                current.done,
                polls
            );
        }
        current.into_result()
    }
}
