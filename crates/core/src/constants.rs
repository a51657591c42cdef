//! Constants shared by the samples.
//!
//! Default endpoints, OAuth parameters and the naming prefixes used when generating
//! throwaway test resources.

/// Default base URL of the Cloud Healthcare REST API.
pub const DEFAULT_HEALTHCARE_ENDPOINT: &str = "https://healthcare.googleapis.com/v1/";

/// Default base URL of the Cloud Storage JSON API (both `storage/v1` and `upload/storage/v1`
/// live under it).
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com/";

/// Default base URL of the Pub/Sub REST API.
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/v1/";

/// Token endpoint used for authorized-user refresh tokens.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth scope requested for every sample.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Region used by the integration suite.
pub const DEFAULT_CLOUD_REGION: &str = "us-central1";

/// Default delay between long-running operation polls, in milliseconds.
pub const DEFAULT_OPERATION_POLL_MS: u64 = 1_000;

/// Default number of polls before an operation is reported as timed out.
pub const DEFAULT_OPERATION_MAX_POLLS: u32 = 120;

/// DICOM fixture uploaded to the test bucket.
pub const DICOM_FIXTURE_FILENAME: &str = "IM-0002-0001-JPEG-BASELINE.dcm";

pub const BUCKET_PREFIX: &str = "dicom-samples-test-";
pub const TOPIC_PREFIX: &str = "healthcare-test-topic-";
pub const DATASET_PREFIX: &str = "dicom_samples_test_";
pub const DICOM_STORE_PREFIX: &str = "dicom_samples_test_store_";

pub const ENV_PROJECT: &str = "GCLOUD_PROJECT";
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const ENV_HEALTHCARE_ENDPOINT: &str = "HEALTHCARE_API_ENDPOINT";
pub const ENV_STORAGE_ENDPOINT: &str = "STORAGE_API_ENDPOINT";
pub const ENV_PUBSUB_ENDPOINT: &str = "PUBSUB_API_ENDPOINT";
pub const ENV_OPERATION_POLL_MS: &str = "DICOM_OPERATION_POLL_MS";
pub const ENV_OPERATION_MAX_POLLS: &str = "DICOM_OPERATION_MAX_POLLS";
