//! Setup and teardown of the throwaway resources the DICOM store suite runs against.
//!
//! Setup is strict: resources are created in order and the first failure aborts the run.
//! Teardown is best effort: every step is attempted and failures are only logged, so a broken
//! cleanup never hides the result of the suite itself.

use crate::names::{DatasetName, DicomStoreName, TestResources};
use crate::{CloudClients, CloudResult};
use std::path::Path;

#[derive(Clone, Debug)]
pub struct Fixture {
    project_id: String,
    cloud_region: String,
    resources: TestResources,
}

impl Fixture {
    pub fn new(
        project_id: impl Into<String>,
        cloud_region: impl Into<String>,
        resources: TestResources,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cloud_region: cloud_region.into(),
            resources,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn cloud_region(&self) -> &str {
        &self.cloud_region
    }

    pub fn resources(&self) -> &TestResources {
        &self.resources
    }

    pub fn dataset_name(&self) -> CloudResult<DatasetName> {
        DatasetName::new(
            &self.project_id,
            &self.cloud_region,
            &self.resources.dataset_id,
        )
    }

    pub fn dicom_store_name(&self) -> CloudResult<DicomStoreName> {
        self.dataset_name()?
            .dicom_store(&self.resources.dicom_store_id)
    }

    /// Creates the bucket, uploads the DICOM fixture, creates the topic and the dataset.
    ///
    /// # Arguments
    ///
    /// * `clients` - Clients for the project the resources are created in.
    /// * `dicom_file` - Local DICOM file. It is uploaded as `resources().object_name` whatever
    ///   its own file name, so `resources().fixture_path()` always names the uploaded object.
    ///
    /// # Errors
    ///
    /// Returns the first `CloudError` encountered; later steps are not attempted. Resources
    /// created before the failure are left for `teardown`.
    pub async fn setup(&self, clients: &CloudClients, dicom_file: &Path) -> CloudResult<()> {
        let bucket = &self.resources.bucket_name;
        clients.storage.create_bucket(&self.project_id, bucket).await?;
        tracing::info!("Bucket {} created.", bucket);

        clients
            .storage
            .upload_file_as(bucket, &self.resources.object_name, dicom_file)
            .await?;

        let topic = clients
            .pubsub
            .create_topic(&self.project_id, &self.resources.topic_id)
            .await?;
        tracing::info!("Topic {} created.", topic.name);

        let dataset = clients.healthcare.create_dataset(&self.dataset_name()?).await?;
        tracing::info!("Dataset {} created.", dataset.name);
        Ok(())
    }

    /// Removes everything `setup` created, including after a partial setup. Never fails.
    pub async fn teardown(&self, clients: &CloudClients) {
        let bucket = &self.resources.bucket_name;

        ignore("delete bucket contents", clients.storage.delete_objects(bucket).await);
        ignore("delete bucket contents", clients.storage.delete_objects(bucket).await);
        if ignore("delete bucket", clients.storage.delete_bucket(bucket).await).is_some() {
            tracing::info!("Bucket {} deleted.", bucket);
        }

        let topic = clients
            .pubsub
            .delete_topic(&self.project_id, &self.resources.topic_id)
            .await;
        if ignore("delete topic", topic).is_some() {
            tracing::info!("Topic {} deleted.", self.resources.topic_id);
        }

        match self.dataset_name() {
            Ok(dataset) => {
                ignore(
                    "delete dataset",
                    clients.healthcare.delete_dataset(&dataset).await,
                );
            }
            Err(e) => tracing::debug!("teardown: skipping dataset delete: {}", e),
        }
    }
}

fn ignore<T>(step: &str, result: CloudResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("teardown: {} failed: {}", step, e);
            None
        }
    }
}
