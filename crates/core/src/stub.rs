//! In-memory stand-in for the Healthcare, Cloud Storage and Pub/Sub REST APIs.
//!
//! Only the calls the samples make are modelled, with enough state to make lifecycle ordering
//! observable: a store must exist before it can be read, patched, imported into or deleted, and
//! bucket objects written by an export can be listed afterwards. Long-running operations report
//! `done: false` when started and finish on their first poll.
//!
//! The server runs on its own thread and runtime, so it serves both async tests and tests that
//! spawn the `dicom` binary with blocking process calls.

use crate::config::{ApiEndpoints, CloudConfig, CredentialsSource, OperationPolling};
use crate::constants::{
    ENV_ACCESS_TOKEN, ENV_HEALTHCARE_ENDPOINT, ENV_OPERATION_POLL_MS, ENV_PUBSUB_ENDPOINT,
    ENV_STORAGE_ENDPOINT,
};
use crate::CloudResult;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

/// Bearer token the stub accepts.
pub const STUB_ACCESS_TOKEN: &str = "stub-access-token";

#[derive(Default)]
struct StubState {
    datasets: BTreeSet<String>,
    stores: BTreeMap<String, Value>,
    policies: BTreeMap<String, Value>,
    instances: BTreeMap<String, Vec<Vec<u8>>>,
    buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    topics: BTreeSet<String>,
    failing_deletes: BTreeSet<(String, String)>,
    operations: BTreeMap<String, Value>,
    counter: u64,
}

impl StubState {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Record a finished operation and return the pending view handed to the caller.
    fn start_operation(&mut self, dataset: &str, outcome: Result<Value, (i32, String)>) -> Value {
        let name = format!("{dataset}/operations/{}", self.next_id());
        let finished = match outcome {
            Ok(response) => json!({ "name": name, "done": true, "response": response }),
            Err((code, message)) => json!({
                "name": name,
                "done": true,
                "error": { "code": code, "message": message },
            }),
        };
        self.operations.insert(name.clone(), finished);
        json!({ "name": name, "metadata": {} })
    }
}

type Shared = Arc<Mutex<StubState>>;

fn lock(state: &Shared) -> MutexGuard<'_, StubState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle for a running stub. Dropping it stops the server.
pub struct StubServer {
    base_url: Url,
    state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubServer {
    pub fn spawn() -> io::Result<Self> {
        let listener = StdTcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let base_url = Url::parse(&format!("http://{addr}/"))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let state: Shared = Arc::default();
        let app = Router::new().fallback(handle).with_state(state.clone());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        thread::spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        tracing::error!("stub listener failed: {}", e);
                        return;
                    }
                };
                let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                });
                if let Err(e) = server.await {
                    tracing::error!("stub server failed: {}", e);
                }
            });
        });

        Ok(Self {
            base_url,
            state,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Configuration pointing every client at this stub, with near-instant operation polling.
    pub fn cloud_config(&self) -> CloudResult<CloudConfig> {
        Ok(CloudConfig::new(
            CredentialsSource::AccessToken(STUB_ACCESS_TOKEN.to_string()),
            ApiEndpoints::single(self.base_url.clone())?,
            OperationPolling {
                interval: Duration::from_millis(1),
                max_polls: 50,
            },
        ))
    }

    /// Environment a child process needs to talk to this stub.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let base = self.base_url.to_string();
        vec![
            (ENV_ACCESS_TOKEN, STUB_ACCESS_TOKEN.to_string()),
            (ENV_HEALTHCARE_ENDPOINT, base.clone()),
            (ENV_STORAGE_ENDPOINT, base.clone()),
            (ENV_PUBSUB_ENDPOINT, base),
            (ENV_OPERATION_POLL_MS, "1".to_string()),
        ]
    }

    pub fn seed_object(&self, bucket: &str, name: &str, data: Vec<u8>) {
        lock(&self.state)
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(name.to_string(), data);
    }

    /// Make every delete of `bucket/name` answer `500` while leaving the object in place.
    pub fn fail_deletes_of(&self, bucket: &str, name: &str) {
        lock(&self.state)
            .failing_deletes
            .insert((bucket.to_string(), name.to_string()));
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        lock(&self.state).buckets.contains_key(bucket)
    }

    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        lock(&self.state)
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// `topic` is the full `projects/{p}/topics/{t}` name.
    pub fn has_topic(&self, topic: &str) -> bool {
        lock(&self.state).topics.contains(topic)
    }

    pub fn has_dataset(&self, dataset: &str) -> bool {
        lock(&self.state).datasets.contains(dataset)
    }

    pub fn has_dicom_store(&self, store: &str) -> bool {
        lock(&self.state).stores.contains_key(store)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let expected = format!("Bearer {STUB_ACCESS_TOKEN}");
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return error(StatusCode::UNAUTHORIZED, "missing or invalid bearer token");
    }

    let query: BTreeMap<String, String> =
        url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
            .into_owned()
            .collect();
    let decoded: Vec<String> = uri
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect();
    let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let mut state = lock(&state);
    route(&mut state, method.as_str(), &segments, &query, body)
}

fn route(
    s: &mut StubState,
    method: &str,
    path: &[&str],
    query: &BTreeMap<String, String>,
    body: Value,
) -> Response {
    match (method, path) {
        ("POST", ["storage", "v1", "b"]) => create_bucket(s, &body),
        ("DELETE", ["storage", "v1", "b", bucket]) => delete_bucket(s, bucket),
        ("GET", ["storage", "v1", "b", bucket, "o"]) => list_objects(s, bucket),
        ("DELETE", ["storage", "v1", "b", bucket, "o", object]) => delete_object(s, bucket, object),
        ("POST", ["upload", "storage", "v1", "b", bucket, "o"]) => {
            upload_object(s, bucket, query)
        }

        ("PUT", ["projects", _, "topics", _]) => create_topic(s, &path.join("/")),
        ("DELETE", ["projects", _, "topics", _]) => delete_topic(s, &path.join("/")),

        ("POST", ["projects", _, "locations", _, "datasets"]) => {
            create_dataset(s, &path.join("/"), query)
        }
        ("GET", ["projects", _, "locations", _, "datasets", _, "operations", _]) => {
            match s.operations.get(&path.join("/")) {
                Some(op) => ok(op.clone()),
                None => not_found(&path.join("/")),
            }
        }
        ("GET", ["projects", _, "locations", _, "datasets", _]) => {
            let name = path.join("/");
            if s.datasets.contains(&name) {
                ok(json!({ "name": name }))
            } else {
                not_found(&name)
            }
        }
        ("DELETE", ["projects", _, "locations", _, "datasets", _]) => {
            delete_dataset(s, &path.join("/"))
        }
        ("POST", ["projects", _, "locations", _, "datasets", _, "dicomStores"]) => {
            create_store(s, &path[..6].join("/"), query)
        }
        ("GET", ["projects", _, "locations", _, "datasets", _, "dicomStores"]) => {
            list_stores(s, &path[..6].join("/"))
        }
        (_, ["projects", _, "locations", _, "datasets", _, "dicomStores", store]) => {
            let dataset = path[..6].join("/");
            let (store_id, action) = match store.split_once(':') {
                Some((id, action)) => (id, Some(action)),
                None => (*store, None),
            };
            let name = format!("{dataset}/dicomStores/{store_id}");
            store_request(s, method, &dataset, &name, action, body)
        }

        _ => error(
            StatusCode::NOT_FOUND,
            &format!("no route for {method} /{}", path.join("/")),
        ),
    }
}

fn ok(value: Value) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

fn error(status: StatusCode, message: &str) -> Response {
    let body = json!({ "error": { "code": status.as_u16(), "message": message } });
    (status, Json(body)).into_response()
}

fn not_found(what: &str) -> Response {
    error(StatusCode::NOT_FOUND, &format!("{what} not found"))
}

fn already_exists(what: &str) -> Response {
    error(StatusCode::CONFLICT, &format!("{what} already exists"))
}

// Cloud Storage

fn create_bucket(s: &mut StubState, body: &Value) -> Response {
    let Some(name) = body["name"].as_str() else {
        return error(StatusCode::BAD_REQUEST, "bucket name is required");
    };
    if s.buckets.contains_key(name) {
        return already_exists(name);
    }
    s.buckets.insert(name.to_string(), BTreeMap::new());
    ok(json!({ "name": name }))
}

fn delete_bucket(s: &mut StubState, bucket: &str) -> Response {
    match s.buckets.get(bucket) {
        None => not_found(bucket),
        Some(objects) if !objects.is_empty() => {
            error(StatusCode::CONFLICT, "the bucket you tried to delete is not empty")
        }
        Some(_) => {
            s.buckets.remove(bucket);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

fn list_objects(s: &StubState, bucket: &str) -> Response {
    let Some(objects) = s.buckets.get(bucket) else {
        return not_found(bucket);
    };
    let items: Vec<Value> = objects
        .keys()
        .map(|name| json!({ "name": name, "bucket": bucket }))
        .collect();
    if items.is_empty() {
        ok(json!({ "kind": "storage#objects" }))
    } else {
        ok(json!({ "kind": "storage#objects", "items": items }))
    }
}

fn delete_object(s: &mut StubState, bucket: &str, object: &str) -> Response {
    if s
        .failing_deletes
        .contains(&(bucket.to_string(), object.to_string()))
    {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "backend error");
    }
    match s.buckets.get_mut(bucket).and_then(|o| o.remove(object)) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(&format!("{bucket}/{object}")),
    }
}

fn upload_object(s: &mut StubState, bucket: &str, query: &BTreeMap<String, String>) -> Response {
    let Some(name) = query.get("name") else {
        return error(StatusCode::BAD_REQUEST, "object name is required");
    };
    let Some(objects) = s.buckets.get_mut(bucket) else {
        return not_found(bucket);
    };
    // The body is not kept verbatim; a marker is enough for import/export bookkeeping.
    objects.insert(name.clone(), b"DICM".to_vec());
    ok(json!({ "name": name, "bucket": bucket }))
}

// Pub/Sub

fn create_topic(s: &mut StubState, name: &str) -> Response {
    if !s.topics.insert(name.to_string()) {
        return already_exists(name);
    }
    ok(json!({ "name": name }))
}

fn delete_topic(s: &mut StubState, name: &str) -> Response {
    if s.topics.remove(name) {
        ok(json!({}))
    } else {
        not_found(name)
    }
}

// Healthcare

fn create_dataset(s: &mut StubState, collection: &str, query: &BTreeMap<String, String>) -> Response {
    let Some(id) = query.get("datasetId") else {
        return error(StatusCode::BAD_REQUEST, "datasetId is required");
    };
    let name = format!("{collection}/{id}");
    if s.datasets.contains(&name) {
        return already_exists(&name);
    }
    s.datasets.insert(name.clone());
    let response = json!({
        "@type": "type.googleapis.com/google.cloud.healthcare.v1.dataset.Dataset",
        "name": name,
    });
    ok(s.start_operation(&name, Ok(response)))
}

fn delete_dataset(s: &mut StubState, name: &str) -> Response {
    if !s.datasets.remove(name) {
        return not_found(name);
    }
    let prefix = format!("{name}/");
    s.stores.retain(|store, _| !store.starts_with(&prefix));
    s.policies.retain(|store, _| !store.starts_with(&prefix));
    s.instances.retain(|store, _| !store.starts_with(&prefix));
    ok(json!({}))
}

fn create_store(s: &mut StubState, dataset: &str, query: &BTreeMap<String, String>) -> Response {
    if !s.datasets.contains(dataset) {
        return not_found(dataset);
    }
    let Some(id) = query.get("dicomStoreId") else {
        return error(StatusCode::BAD_REQUEST, "dicomStoreId is required");
    };
    let name = format!("{dataset}/dicomStores/{id}");
    if s.stores.contains_key(&name) {
        return already_exists(&name);
    }
    let store = json!({ "name": name });
    s.stores.insert(name, store.clone());
    ok(store)
}

fn list_stores(s: &StubState, dataset: &str) -> Response {
    if !s.datasets.contains(dataset) {
        return not_found(dataset);
    }
    let prefix = format!("{dataset}/dicomStores/");
    let stores: Vec<Value> = s
        .stores
        .iter()
        .filter(|(name, _)| name.starts_with(&prefix))
        .map(|(_, store)| store.clone())
        .collect();
    if stores.is_empty() {
        ok(json!({}))
    } else {
        ok(json!({ "dicomStores": stores }))
    }
}

fn store_request(
    s: &mut StubState,
    method: &str,
    dataset: &str,
    name: &str,
    action: Option<&str>,
    body: Value,
) -> Response {
    if !s.datasets.contains(dataset) {
        return not_found(dataset);
    }
    if !s.stores.contains_key(name) {
        return not_found(name);
    }

    match (method, action) {
        ("GET", None) => ok(s.stores[name].clone()),
        ("PATCH", None) => {
            let Some(store) = s.stores.get_mut(name) else {
                return not_found(name);
            };
            if let Some(config) = body.get("notificationConfig") {
                store["notificationConfig"] = config.clone();
            }
            ok(store.clone())
        }
        ("DELETE", None) => {
            s.stores.remove(name);
            s.policies.remove(name);
            s.instances.remove(name);
            ok(json!({}))
        }
        ("GET", Some("getIamPolicy")) => ok(current_policy(s, name)),
        ("POST", Some("setIamPolicy")) => set_policy(s, name, body),
        ("POST", Some("import")) => import_instances(s, dataset, name, &body),
        ("POST", Some("export")) => export_instances(s, dataset, name, &body),
        _ => error(
            StatusCode::METHOD_NOT_ALLOWED,
            &format!("{method} not supported on {name}"),
        ),
    }
}

fn current_policy(s: &StubState, name: &str) -> Value {
    s.policies
        .get(name)
        .cloned()
        .unwrap_or_else(|| json!({ "version": 1, "etag": "etag-0" }))
}

fn set_policy(s: &mut StubState, name: &str, body: Value) -> Response {
    let Some(mut policy) = body.get("policy").cloned() else {
        return error(StatusCode::BAD_REQUEST, "policy is required");
    };
    let current = current_policy(s, name);
    if let Some(etag) = policy.get("etag") {
        if etag != &current["etag"] {
            return error(StatusCode::CONFLICT, "etag does not match the current policy");
        }
    }
    policy["etag"] = json!(format!("etag-{}", s.next_id()));
    s.policies.insert(name.to_string(), policy.clone());
    ok(policy)
}

/// Split `gs://bucket/path` into bucket and path (path may be empty).
fn split_gcs_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("gs://")?;
    match rest.split_once('/') {
        Some((bucket, path)) => Some((bucket, path)),
        None => Some((rest, "")),
    }
}

fn import_instances(s: &mut StubState, dataset: &str, store: &str, body: &Value) -> Response {
    let Some(uri) = body["gcsSource"]["uri"].as_str() else {
        return error(StatusCode::BAD_REQUEST, "gcsSource.uri is required");
    };
    let outcome = match split_gcs_uri(uri) {
        None => Err((3, format!("invalid GCS URI {uri}"))),
        Some((bucket, path)) => {
            let prefix = path.trim_end_matches('*');
            let exact = prefix.len() == path.len();
            let matched: Vec<Vec<u8>> = s
                .buckets
                .get(bucket)
                .map(|objects| {
                    objects
                        .iter()
                        .filter(|(name, _)| {
                            if exact {
                                name.as_str() == path
                            } else {
                                name.starts_with(prefix)
                            }
                        })
                        .map(|(_, data)| data.clone())
                        .collect()
                })
                .unwrap_or_default();
            if matched.is_empty() {
                Err((5, format!("no DICOM objects found at {uri}")))
            } else {
                s.instances.entry(store.to_string()).or_default().extend(matched);
                Ok(json!({
                    "@type": "type.googleapis.com/google.protobuf.Empty",
                }))
            }
        }
    };
    ok(s.start_operation(dataset, outcome))
}

fn export_instances(s: &mut StubState, dataset: &str, store: &str, body: &Value) -> Response {
    let Some(uri) = body["gcsDestination"]["uriPrefix"].as_str() else {
        return error(StatusCode::BAD_REQUEST, "gcsDestination.uriPrefix is required");
    };
    let instances = s.instances.get(store).cloned().unwrap_or_default();
    let outcome = match split_gcs_uri(uri) {
        None => Err((3, format!("invalid GCS URI {uri}"))),
        Some((bucket, prefix)) => match s.buckets.get_mut(bucket) {
            None => Err((5, format!("bucket {bucket} not found"))),
            Some(objects) => {
                let prefix = prefix.trim_end_matches('/');
                for (i, data) in instances.into_iter().enumerate() {
                    let object = if prefix.is_empty() {
                        format!("instance-{i}.dcm")
                    } else {
                        format!("{prefix}/instance-{i}.dcm")
                    };
                    objects.insert(object, data);
                }
                Ok(json!({ "@type": "type.googleapis.com/google.protobuf.Empty" }))
            }
        },
    };
    ok(s.start_operation(dataset, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_gcs_uris() {
        assert_eq!(split_gcs_uri("gs://b/dir/f.dcm"), Some(("b", "dir/f.dcm")));
        assert_eq!(split_gcs_uri("gs://b"), Some(("b", "")));
        assert_eq!(split_gcs_uri("b/f.dcm"), None);
    }

    #[tokio::test]
    async fn rejects_requests_without_token() {
        let stub = StubServer::spawn().unwrap();
        let url = stub.base_url().join("storage/v1/b").unwrap();
        let response = reqwest::Client::new().post(url).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bucket_with_objects_cannot_be_deleted() {
        let stub = StubServer::spawn().unwrap();
        stub.seed_object("b", "f.dcm", vec![1]);
        let url = stub.base_url().join("storage/v1/b/b").unwrap();
        let response = reqwest::Client::new()
            .delete(url)
            .bearer_auth(STUB_ACCESS_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
        assert!(stub.has_bucket("b"));
    }
}
