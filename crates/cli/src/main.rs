use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use samples_core::names::{gcs_uri, topic_name};
use samples_core::{CloudClients, CloudConfig, CloudResult, DatasetName, DicomStoreName};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dicom")]
#[command(about = "Cloud Healthcare API DICOM store samples")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DatasetArgs {
    /// Project ID
    project_id: String,
    /// Region of the dataset, e.g. us-central1
    cloud_region: String,
    /// Dataset ID
    dataset_id: String,
}

impl DatasetArgs {
    fn name(&self) -> CloudResult<DatasetName> {
        DatasetName::new(&self.project_id, &self.cloud_region, &self.dataset_id)
    }
}

#[derive(Args)]
struct StoreArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    /// DICOM store ID
    dicom_store_id: String,
}

impl StoreArgs {
    fn name(&self) -> CloudResult<DicomStoreName> {
        self.dataset.name()?.dicom_store(&self.dicom_store_id)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a dataset
    CreateDataset(DatasetArgs),
    /// Delete a dataset and everything in it
    DeleteDataset(DatasetArgs),
    /// Create a DICOM store
    CreateDicomStore(StoreArgs),
    /// Print a DICOM store as JSON
    GetDicomStore(StoreArgs),
    /// Send the store's notifications to a Pub/Sub topic
    PatchDicomStore {
        #[command(flatten)]
        store: StoreArgs,
        /// Topic ID, in the same project
        pubsub_topic: String,
    },
    /// Print every DICOM store in a dataset as JSON
    ListDicomStores(DatasetArgs),
    /// Delete a DICOM store
    DeleteDicomStore(StoreArgs),
    /// Grant a role on a DICOM store
    SetDicomStoreIamPolicy {
        #[command(flatten)]
        store: StoreArgs,
        /// Member, e.g. group:dpebot@google.com
        member: String,
        /// Role, e.g. roles/viewer
        role: String,
    },
    /// Print a DICOM store's IAM policy as JSON
    GetDicomStoreIamPolicy(StoreArgs),
    /// Import DICOM instances from Cloud Storage
    ImportDicomInstance {
        #[command(flatten)]
        store: StoreArgs,
        /// Source as bucket/object; wildcards are allowed
        gcs_uri: String,
    },
    /// Export DICOM instances to Cloud Storage
    ExportDicomInstanceGcs {
        #[command(flatten)]
        store: StoreArgs,
        /// Destination bucket, optionally with a path prefix
        gcs_uri_prefix: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout is reserved for sample output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("samples_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = CloudConfig::from_lookup(|key| std::env::var(key).ok())
        .context("failed to load configuration")?;
    let clients = CloudClients::from_config(&config)
        .await
        .context("failed to load credentials")?;

    run(cli.command, &clients).await
}

async fn run(command: Commands, clients: &CloudClients) -> anyhow::Result<()> {
    let hc = &clients.healthcare;

    match command {
        Commands::CreateDataset(args) => {
            let dataset = hc
                .create_dataset(&args.name()?)
                .await
                .context("failed to create dataset")?;
            println!("Created dataset: {}", dataset.name);
        }
        Commands::DeleteDataset(args) => {
            hc.delete_dataset(&args.name()?)
                .await
                .context("failed to delete dataset")?;
            println!("Deleted dataset: {}", args.dataset_id);
        }
        Commands::CreateDicomStore(args) => {
            hc.create_dicom_store(&args.name()?)
                .await
                .context("failed to create DICOM store")?;
            println!("Created DICOM store: {}", args.dicom_store_id);
        }
        Commands::GetDicomStore(args) => {
            let store = hc
                .get_dicom_store(&args.name()?)
                .await
                .context("failed to get DICOM store")?;
            println!("{}", serde_json::to_string_pretty(&store)?);
        }
        Commands::PatchDicomStore {
            store,
            pubsub_topic,
        } => {
            let topic = topic_name(&store.dataset.project_id, &pubsub_topic);
            hc.patch_dicom_store(&store.name()?, &topic)
                .await
                .context("failed to patch DICOM store")?;
            println!(
                "Patched DICOM store with Cloud Pub/Sub topic {}",
                pubsub_topic
            );
        }
        Commands::ListDicomStores(args) => {
            let list = hc
                .list_dicom_stores(&args.name()?)
                .await
                .context("failed to list DICOM stores")?;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Commands::DeleteDicomStore(args) => {
            hc.delete_dicom_store(&args.name()?)
                .await
                .context("failed to delete DICOM store")?;
            println!("Deleted DICOM store: {}", args.dicom_store_id);
        }
        Commands::SetDicomStoreIamPolicy {
            store,
            member,
            role,
        } => {
            let policy = hc
                .add_dicom_store_iam_member(&store.name()?, &member, &role)
                .await
                .context("failed to set DICOM store IAM policy")?;
            println!("ETAG: {}", policy.etag.unwrap_or_default());
        }
        Commands::GetDicomStoreIamPolicy(args) => {
            let policy = hc
                .get_dicom_store_iam_policy(&args.name()?)
                .await
                .context("failed to get DICOM store IAM policy")?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
        Commands::ImportDicomInstance { store, gcs_uri: source } => {
            let uri = gcs_uri(&source)?;
            hc.import_dicom_instances(&store.name()?, &uri)
                .await
                .context("failed to import DICOM instances")?;
            println!("Successfully imported DICOM instances");
        }
        Commands::ExportDicomInstanceGcs {
            store,
            gcs_uri_prefix,
        } => {
            let uri = gcs_uri(&gcs_uri_prefix)?;
            hc.export_dicom_instances(&store.name()?, &uri)
                .await
                .context("failed to export DICOM instances")?;
            println!("Exported DICOM instances to bucket {}", uri);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn positional_arguments_follow_sample_order() {
        let cli = Cli::try_parse_from([
            "dicom",
            "set-dicom-store-iam-policy",
            "proj",
            "us-central1",
            "ds",
            "store",
            "group:dpebot@google.com",
            "roles/viewer",
        ])
        .unwrap();
        match cli.command {
            Commands::SetDicomStoreIamPolicy {
                store,
                member,
                role,
            } => {
                assert_eq!(
                    store.name().unwrap().to_string(),
                    "projects/proj/locations/us-central1/datasets/ds/dicomStores/store"
                );
                assert_eq!(member, "group:dpebot@google.com");
                assert_eq!(role, "roles/viewer");
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn missing_positional_is_rejected() {
        assert!(Cli::try_parse_from(["dicom", "get-dicom-store", "proj", "us-central1", "ds"]).is_err());
    }
}
