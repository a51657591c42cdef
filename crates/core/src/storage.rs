//! Cloud Storage JSON API client covering the bucket lifecycle the DICOM samples need.

use crate::config::CloudConfig;
use crate::http::{endpoint_url, RestClient};
use crate::names::validate_id;
use crate::{CloudError, CloudResult};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

const DICOM_CONTENT_TYPE: &str = "application/dicom";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub name: String,
    #[serde(default)]
    pub bucket: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectsPage {
    #[serde(default)]
    items: Vec<Object>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StorageClient {
    rest: RestClient,
    base: Url,
}

impl StorageClient {
    /// Creates a client for the Cloud Storage JSON API rooted at `base`, e.g.
    /// `https://storage.googleapis.com/`.
    pub fn new(rest: RestClient, base: Url) -> Self {
        Self { rest, base }
    }

    /// Builds a client using the storage endpoint from `config`.
    pub fn from_rest(rest: RestClient, config: &CloudConfig) -> Self {
        Self::new(rest, config.endpoints().storage().clone())
    }

    fn bucket_url<'a>(
        &self,
        bucket: &'a str,
        rest: impl IntoIterator<Item = &'a str>,
    ) -> CloudResult<Url> {
        validate_id("bucket name", bucket)?;
        endpoint_url(
            &self.base,
            ["storage", "v1", "b", bucket].into_iter().chain(rest),
        )
    }

    /// Creates a bucket in `project_id` with default settings.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `409` when the bucket name is taken.
    pub async fn create_bucket(&self, project_id: &str, bucket: &str) -> CloudResult<Bucket> {
        validate_id("bucket name", bucket)?;
        let mut url = endpoint_url(&self.base, ["storage", "v1", "b"])?;
        url.query_pairs_mut().append_pair("project", project_id);
        let body = Bucket {
            name: bucket.to_string(),
        };

        self.rest
            .execute(self.rest.request(Method::POST, url).json(&body))
            .await
    }

    /// Uploads `data` as a single object using a media upload.
    ///
    /// # Arguments
    ///
    /// * `bucket` - Existing bucket.
    /// * `object_name` - Object name; may contain `/`.
    /// * `content_type` - MIME type stored with the object.
    /// * `data` - Object content.
    pub async fn upload_object(
        &self,
        bucket: &str,
        object_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> CloudResult<Object> {
        validate_id("bucket name", bucket)?;
        let mut url = endpoint_url(&self.base, ["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object_name);

        self.rest
            .execute(
                self.rest
                    .request(Method::POST, url)
                    .header(CONTENT_TYPE, content_type)
                    .body(data),
            )
            .await
    }

    /// Uploads a local DICOM file, naming the object after the file.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::FixtureRead` when the file cannot be read.
    pub async fn upload_file(&self, bucket: &str, path: &Path) -> CloudResult<Object> {
        let object_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                CloudError::InvalidInput(format!("not a file path: {}", path.display()))
            })?;
        self.upload_file_as(bucket, object_name, path).await
    }

    /// Uploads a local DICOM file under an explicit object name.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::FixtureRead` when the file cannot be read.
    pub async fn upload_file_as(
        &self,
        bucket: &str,
        object_name: &str,
        path: &Path,
    ) -> CloudResult<Object> {
        let data = tokio::fs::read(path).await.map_err(CloudError::FixtureRead)?;
        self.upload_object(bucket, object_name, DICOM_CONTENT_TYPE, data)
            .await
    }

    /// Lists every object in the bucket, following page tokens.
    pub async fn list_objects(&self, bucket: &str) -> CloudResult<Vec<Object>> {
        let base = self.bucket_url(bucket, ["o"])?;
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = base.clone();
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: ObjectsPage = self.rest.execute(self.rest.request(Method::GET, url)).await?;
            objects.extend(page.items);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(objects),
            }
        }
    }

    /// Deletes one object. A missing object counts as deleted.
    pub async fn delete_object(&self, bucket: &str, object_name: &str) -> CloudResult<()> {
        let url = self.bucket_url(bucket, ["o", object_name])?;
        match self
            .rest
            .execute_empty(self.rest.request(Method::DELETE, url))
            .await
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Deletes every object in the bucket.
    ///
    /// Safe to call repeatedly: a bucket that is already empty, or already gone, yields `0`.
    /// Listings can lag behind deletes, so callers that need an empty bucket call this twice.
    ///
    /// # Returns
    ///
    /// How many objects were listed for deletion.
    ///
    /// # Errors
    ///
    /// Every listed object is attempted even when some deletes fail; the first failure is
    /// returned once the pass is complete.
    pub async fn delete_objects(&self, bucket: &str) -> CloudResult<usize> {
        let objects = match self.list_objects(bucket).await {
            Ok(objects) => objects,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut first_error = None;
        for object in &objects {
            if let Err(e) = self.delete_object(bucket, &object.name).await {
                tracing::debug!("failed to delete {}/{}: {}", bucket, object.name, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(objects.len()),
        }
    }

    /// Deletes an empty bucket.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::Api` with `409` while the bucket still holds objects.
    pub async fn delete_bucket(&self, bucket: &str) -> CloudResult<()> {
        let url = self.bucket_url(bucket, std::iter::empty())?;
        self.rest
            .execute_empty(self.rest.request(Method::DELETE, url))
            .await
    }
}
