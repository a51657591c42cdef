//! Drives the `dicom` binary against the in-memory healthcare stub.

use samples_core::stub::StubServer;
use std::process::{Command, Output};

const PROJECT: &str = "proj";
const REGION: &str = "us-central1";
const DATASET: &str = "ds";
const STORE: &str = "store";

fn dicom(stub: &StubServer, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dicom"))
        .args(args)
        .envs(stub.env_vars())
        .env_remove("GOOGLE_APPLICATION_CREDENTIALS")
        .output()
        .expect("run dicom")
}

/// Runs a subcommand that must succeed and returns its stdout.
fn ok(stub: &StubServer, args: &[&str]) -> String {
    let output = dicom(stub, args);
    assert!(
        output.status.success(),
        "dicom {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn store_args<'a>(command: &'a str, extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![command, PROJECT, REGION, DATASET, STORE];
    args.extend_from_slice(extra);
    args
}

#[test]
fn dicom_store_samples_run_in_order() {
    let stub = StubServer::spawn().unwrap();
    stub.seed_object("bucket", "IM-0002-0001-JPEG-BASELINE.dcm", b"DICM".to_vec());

    let out = ok(&stub, &["create-dataset", PROJECT, REGION, DATASET]);
    assert!(out.contains("Created dataset: projects/proj/locations/us-central1/datasets/ds"));

    let out = ok(&stub, &store_args("create-dicom-store", &[]));
    assert!(out.contains("Created DICOM store: store"));

    let out = ok(&stub, &store_args("get-dicom-store", &[]));
    assert!(out.contains("name"));

    let out = ok(&stub, &store_args("patch-dicom-store", &["topic"]));
    assert!(out.contains("Patched DICOM store with Cloud Pub/Sub topic topic"));

    let out = ok(&stub, &["list-dicom-stores", PROJECT, REGION, DATASET]);
    assert!(out.contains("dicomStores"));
    assert!(out.contains("projects/proj/topics/topic"));

    let out = ok(
        &stub,
        &store_args(
            "set-dicom-store-iam-policy",
            &["group:dpebot@google.com", "roles/viewer"],
        ),
    );
    assert!(out.contains("ETAG"));

    let out = ok(&stub, &store_args("get-dicom-store-iam-policy", &[]));
    assert!(out.contains("dpebot"));

    let out = ok(
        &stub,
        &store_args(
            "import-dicom-instance",
            &["bucket/IM-0002-0001-JPEG-BASELINE.dcm"],
        ),
    );
    assert!(out.contains("Successfully imported DICOM instances"));

    let out = ok(&stub, &store_args("export-dicom-instance-gcs", &["bucket"]));
    assert!(out.contains("Exported DICOM instances to bucket gs://bucket"));
    assert!(stub.object_names("bucket").len() > 1);

    let out = ok(&stub, &store_args("delete-dicom-store", &[]));
    assert!(out.contains("Deleted DICOM store: store"));
    assert!(!stub.has_dicom_store(
        "projects/proj/locations/us-central1/datasets/ds/dicomStores/store"
    ));

    let out = ok(&stub, &["delete-dataset", PROJECT, REGION, DATASET]);
    assert!(out.contains("Deleted dataset: ds"));
}

#[test]
fn operations_on_missing_store_exit_non_zero() {
    let stub = StubServer::spawn().unwrap();
    ok(&stub, &["create-dataset", PROJECT, REGION, DATASET]);

    for command in [
        "get-dicom-store",
        "delete-dicom-store",
        "get-dicom-store-iam-policy",
    ] {
        let output = dicom(&stub, &store_args(command, &[]));
        assert!(!output.status.success(), "{command} should fail");
        assert!(output.stdout.is_empty());
        assert!(String::from_utf8_lossy(&output.stderr).contains("404"));
    }
}

#[test]
fn failed_import_exits_non_zero() {
    let stub = StubServer::spawn().unwrap();
    ok(&stub, &["create-dataset", PROJECT, REGION, DATASET]);
    ok(&stub, &store_args("create-dicom-store", &[]));

    let output = dicom(
        &stub,
        &store_args("import-dicom-instance", &["no-such-bucket/image.dcm"]),
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to import DICOM instances"));
}

#[test]
fn missing_credentials_are_reported() {
    let stub = StubServer::spawn().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_dicom"))
        .args(["list-dicom-stores", PROJECT, REGION, DATASET])
        .env("HEALTHCARE_API_ENDPOINT", stub.base_url().as_str())
        .env_remove("GOOGLE_OAUTH_ACCESS_TOKEN")
        .env_remove("GOOGLE_APPLICATION_CREDENTIALS")
        .output()
        .expect("run dicom");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("GOOGLE_APPLICATION_CREDENTIALS"));
}
