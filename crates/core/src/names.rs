//! Resource names and throwaway test identifiers.
//!
//! Healthcare resources are addressed by a path of alternating collection and id segments:
//! `projects/{p}/locations/{l}/datasets/{d}/dicomStores/{s}`. The types here keep the individual
//! ids so clients can push them as URL path segments instead of formatting strings.

use crate::constants::{
    BUCKET_PREFIX, DATASET_PREFIX, DICOM_FIXTURE_FILENAME, DICOM_STORE_PREFIX, TOPIC_PREFIX,
};
use crate::{CloudError, CloudResult};
use std::fmt;
use uuid::Uuid;

/// Rejects ids that would change the shape of a resource path.
pub fn validate_id(kind: &str, id: &str) -> CloudResult<()> {
    if id.is_empty() {
        return Err(CloudError::InvalidInput(format!("{kind} cannot be empty")));
    }
    if id.contains('/') || id.chars().any(char::is_whitespace) {
        return Err(CloudError::InvalidInput(format!(
            "{kind} must not contain '/' or whitespace: {id:?}"
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetName {
    project_id: String,
    location: String,
    dataset_id: String,
}

impl DatasetName {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        dataset_id: impl Into<String>,
    ) -> CloudResult<Self> {
        let name = Self {
            project_id: project_id.into(),
            location: location.into(),
            dataset_id: dataset_id.into(),
        };
        validate_id("project id", &name.project_id)?;
        validate_id("location", &name.location)?;
        validate_id("dataset id", &name.dataset_id)?;
        Ok(name)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    /// Path segments of the parent collection (`projects/{p}/locations/{l}/datasets`).
    pub fn collection_segments(&self) -> [&str; 5] {
        [
            "projects",
            self.project_id.as_str(),
            "locations",
            self.location.as_str(),
            "datasets",
        ]
    }

    pub fn segments(&self) -> [&str; 6] {
        [
            "projects",
            self.project_id.as_str(),
            "locations",
            self.location.as_str(),
            "datasets",
            self.dataset_id.as_str(),
        ]
    }

    pub fn dicom_store(&self, dicom_store_id: impl Into<String>) -> CloudResult<DicomStoreName> {
        DicomStoreName::new(self.clone(), dicom_store_id)
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DicomStoreName {
    dataset: DatasetName,
    dicom_store_id: String,
}

impl DicomStoreName {
    pub fn new(dataset: DatasetName, dicom_store_id: impl Into<String>) -> CloudResult<Self> {
        let dicom_store_id = dicom_store_id.into();
        validate_id("DICOM store id", &dicom_store_id)?;
        Ok(Self {
            dataset,
            dicom_store_id,
        })
    }

    pub fn dataset(&self) -> &DatasetName {
        &self.dataset
    }

    pub fn dicom_store_id(&self) -> &str {
        &self.dicom_store_id
    }

    pub fn segments(&self) -> Vec<&str> {
        let mut segments = self.dataset.segments().to_vec();
        segments.extend(["dicomStores", self.dicom_store_id.as_str()]);
        segments
    }

    /// Segments addressing a custom method such as `{store}:import`.
    pub fn method_segments(&self, method: &str) -> Vec<String> {
        let mut segments: Vec<String> = self
            .dataset
            .segments()
            .iter()
            .map(|s| s.to_string())
            .collect();
        segments.push("dicomStores".into());
        segments.push(format!("{}:{method}", self.dicom_store_id));
        segments
    }
}

impl fmt::Display for DicomStoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join("/"))
    }
}

/// Full Pub/Sub topic name, `projects/{p}/topics/{t}`.
pub fn topic_name(project_id: &str, topic_id: &str) -> String {
    format!("projects/{project_id}/topics/{topic_id}")
}

/// Normalise an import source (`bucket/object` or `gs://bucket/object`) to a `gs://` URI.
pub fn gcs_uri(path: &str) -> CloudResult<String> {
    let trimmed = path.trim().trim_start_matches("gs://");
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return Err(CloudError::InvalidInput(format!(
            "expected bucket or bucket/path, got {path:?}"
        )));
    }
    Ok(format!("gs://{trimmed}"))
}

/// Identifiers of the throwaway resources used by one run of the DICOM store suite.
///
/// Every field carries a fresh v4 UUID, so two runs never share a resource. Dataset and store
/// ids use `_` in place of `-`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResources {
    pub bucket_name: String,
    pub topic_id: String,
    pub dataset_id: String,
    pub dicom_store_id: String,
    pub object_name: String,
}

impl TestResources {
    pub fn generate() -> Self {
        let underscored = |prefix: &str| format!("{prefix}{}", Uuid::new_v4()).replace('-', "_");

        Self {
            bucket_name: format!("{BUCKET_PREFIX}{}", Uuid::new_v4()),
            topic_id: format!("{TOPIC_PREFIX}{}", Uuid::new_v4()),
            dataset_id: underscored(DATASET_PREFIX),
            dicom_store_id: underscored(DICOM_STORE_PREFIX),
            object_name: DICOM_FIXTURE_FILENAME.to_string(),
        }
    }

    /// `bucket/object` of the uploaded fixture, as passed to the import sample.
    pub fn fixture_path(&self) -> String {
        format!("{}/{}", self.bucket_name, self.object_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn dataset_name_formats_full_path() {
        let name = DatasetName::new("proj", "us-central1", "ds").unwrap();
        assert_eq!(name.to_string(), "projects/proj/locations/us-central1/datasets/ds");
    }

    #[test]
    fn dicom_store_name_formats_full_path() {
        let store = DatasetName::new("proj", "us-central1", "ds")
            .unwrap()
            .dicom_store("store")
            .unwrap();
        assert_eq!(
            store.to_string(),
            "projects/proj/locations/us-central1/datasets/ds/dicomStores/store"
        );
        assert_eq!(store.method_segments("import").last().unwrap(), "store:import");
    }

    #[test]
    fn ids_with_slashes_are_rejected() {
        assert!(DatasetName::new("proj", "us-central1", "a/b").is_err());
        assert!(DatasetName::new("", "us-central1", "ds").is_err());
        let dataset = DatasetName::new("proj", "us-central1", "ds").unwrap();
        assert!(dataset.dicom_store("has space").is_err());
    }

    #[test]
    fn gcs_uri_adds_scheme_once() {
        assert_eq!(gcs_uri("bucket/file.dcm").unwrap(), "gs://bucket/file.dcm");
        assert_eq!(gcs_uri("gs://bucket").unwrap(), "gs://bucket");
        assert!(gcs_uri("gs://").is_err());
        assert!(gcs_uri("").is_err());
    }

    #[test]
    fn topic_name_is_fully_qualified() {
        assert_eq!(topic_name("proj", "t"), "projects/proj/topics/t");
    }

    #[test]
    fn generated_resources_have_expected_shape() {
        let res = TestResources::generate();
        assert!(res.bucket_name.starts_with(BUCKET_PREFIX));
        assert!(res.topic_id.starts_with(TOPIC_PREFIX));
        assert!(res.dataset_id.starts_with(DATASET_PREFIX));
        assert!(!res.dataset_id.contains('-'));
        assert!(!res.dicom_store_id.contains('-'));
        assert_eq!(
            res.fixture_path(),
            format!("{}/{}", res.bucket_name, DICOM_FIXTURE_FILENAME)
        );
        DatasetName::new("proj", "us-central1", &res.dataset_id)
            .unwrap()
            .dicom_store(&res.dicom_store_id)
            .unwrap();
    }

    #[test]
    fn generated_resources_never_collide() {
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let res = TestResources::generate();
            for id in [res.bucket_name, res.topic_id, res.dataset_id, res.dicom_store_id] {
                assert!(seen.insert(id), "duplicate identifier generated");
            }
        }
    }
}
