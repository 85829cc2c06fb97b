//! vaultctl: administration CLI for the file vault.
//!
//! Reads DATABASE_URL and the rest of the process configuration from the environment
//! (a `.env` file is honoured). Output is JSON on stdout; logs go through tracing.

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;
use vault_cli::{collect_upload_items, file_timestamps, print_json, report_error, ExportMode};
use vault_core::models::{
    BackendSettings, CreateBackendRequest, CreateFolderRequest, DeleteScope, ExportDocument,
    LocalSettings, S3Settings, UpdateBackendRequest,
};
use vault_core::Config;
use vault_db::setup_database;
use vault_infra::{init_telemetry, shutdown_telemetry};
use vault_services::{UploadRequest, VaultServices};
use vault_storage::Disposition;

/// sysexits.h EX_CONFIG
const EXIT_CONFIG: u8 = 78;

#[derive(Parser)]
#[command(name = "vaultctl", about = "File vault administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Storage backend configurations
    Backends {
        #[command(subcommand)]
        sub: BackendCommands,
    },
    /// Folder tree operations
    Folders {
        #[command(subcommand)]
        sub: FolderCommands,
    },
    /// Recycle bin operations
    Recycle {
        #[command(subcommand)]
        sub: RecycleCommands,
    },
    /// Upload a file, or every file below a directory
    Upload {
        #[arg(long)]
        owner: Uuid,
        /// Target folder
        #[arg(long)]
        folder: Option<Uuid>,
        path: PathBuf,
    },
    /// Resolve a download, or write the bytes to --output
    Download {
        #[arg(long)]
        owner: Uuid,
        id: Uuid,
        #[arg(long)]
        inline: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BackendCommands {
    List,
    Get { id: Uuid },
    /// Add a local filesystem backend
    AddLocal {
        #[arg(long)]
        name: String,
        #[arg(long)]
        base_dir: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        default: bool,
    },
    /// Add an S3-compatible backend
    AddS3 {
        #[arg(long)]
        name: String,
        #[arg(long)]
        bucket: String,
        #[arg(long, env = "VAULT_S3_ACCESS_KEY")]
        access_key: String,
        #[arg(long, env = "VAULT_S3_SECRET_KEY", hide_env_values = true)]
        secret_key: String,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        /// Browser-facing endpoint used for signed URLs
        #[arg(long)]
        public_url: Option<String>,
        #[arg(long)]
        path_style: bool,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        default: bool,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        /// An empty value clears the description.
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        default: Option<bool>,
    },
    SetDefault { id: Uuid },
    Delete { id: Uuid },
    /// Check that a stored backend is reachable
    Test { id: Uuid },
    Export {
        #[arg(long, value_enum, default_value = "plaintext")]
        credentials: ExportMode,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Import {
        file: PathBuf,
        /// Overwrite configurations whose names already exist
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Subcommand)]
enum FolderCommands {
    List {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    Create {
        #[arg(long)]
        owner: Uuid,
        name: String,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    Rename {
        #[arg(long)]
        owner: Uuid,
        id: Uuid,
        name: String,
    },
    /// Move folders under --to, or to the root when omitted
    Move {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        to: Option<Uuid>,
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Create a nested path such as `a/b/c` if it does not exist
    Mkpath {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        base: Option<Uuid>,
        path: String,
    },
    /// Move folders to the recycle bin
    Delete {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        subtree: bool,
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
}

#[derive(Subcommand)]
enum RecycleCommands {
    List {
        #[arg(long)]
        owner: Uuid,
    },
    /// Move files to the recycle bin
    DeleteFiles {
        #[arg(long)]
        owner: Uuid,
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    Restore {
        #[arg(long)]
        owner: Uuid,
        #[arg(long = "file")]
        files: Vec<Uuid>,
        #[arg(long = "folder")]
        folders: Vec<Uuid>,
        #[arg(long)]
        subtree: bool,
    },
    /// Permanently delete files and folders
    Purge {
        #[arg(long)]
        owner: Uuid,
        #[arg(long = "file")]
        files: Vec<Uuid>,
        #[arg(long = "folder")]
        folders: Vec<Uuid>,
    },
    /// Permanently delete everything in the recycle bin
    Empty {
        #[arg(long)]
        owner: Uuid,
    },
}

fn scope(subtree: bool) -> DeleteScope {
    if subtree {
        DeleteScope::Subtree
    } else {
        DeleteScope::Single
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::from_env().context("Failed to load configuration") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", report_error(&e, false).message);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let code = match execute(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let report = report_error(&e, config.is_production());
            eprintln!("{}", report.message);
            ExitCode::from(u8::try_from(report.exit_code).unwrap_or(1))
        }
    };
    shutdown_telemetry().await;
    code
}

async fn execute(cli: Cli, config: &Config) -> anyhow::Result<()> {
    init_telemetry(config.log_format(), Some("vault=info,warn"))?;
    let pool = setup_database(config).await?;
    let vault = VaultServices::from_pool(pool, config).context("Failed to wire services")?;
    run(cli.command, &vault).await
}

async fn run(command: Commands, vault: &VaultServices) -> anyhow::Result<()> {
    match command {
        Commands::Backends { sub } => backends(sub, vault).await,
        Commands::Folders { sub } => folders(sub, vault).await,
        Commands::Recycle { sub } => recycle(sub, vault).await,
        Commands::Upload {
            owner,
            folder,
            path,
        } => {
            let meta = tokio::fs::metadata(&path)
                .await
                .with_context(|| format!("Cannot read {}", path.display()))?;
            if meta.is_dir() {
                let items = collect_upload_items(&path).await?;
                let report = vault.uploads.upload_batch(owner, folder, items).await?;
                print_json(&report)
            } else {
                let content = tokio::fs::read(&path).await?;
                let (original_created_at, original_updated_at) = file_timestamps(&meta);
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let record = vault
                    .uploads
                    .upload(UploadRequest {
                        owner_id: owner,
                        folder_id: folder,
                        filename,
                        content_type: None,
                        content: Bytes::from(content),
                        original_created_at,
                        original_updated_at,
                    })
                    .await?;
                print_json(&record)
            }
        }
        Commands::Download {
            owner,
            id,
            inline,
            output,
        } => match output {
            Some(output) => {
                let (record, content) = vault.downloads.read(owner, id).await?;
                tokio::fs::write(&output, &content)
                    .await
                    .with_context(|| format!("Cannot write {}", output.display()))?;
                print_json(&serde_json::json!({
                    "file_id": record.id,
                    "filename": record.filename,
                    "bytes": content.len(),
                    "written_to": output,
                }))
            }
            None => {
                let disposition = if inline {
                    Disposition::Inline
                } else {
                    Disposition::Attachment
                };
                let target = vault.downloads.download(owner, id, disposition).await?;
                print_json(&target)
            }
        },
    }
}

async fn backends(command: BackendCommands, vault: &VaultServices) -> anyhow::Result<()> {
    let service = &vault.backends;
    match command {
        BackendCommands::List => print_json(&service.list().await?),
        BackendCommands::Get { id } => print_json(&service.get(id).await?),
        BackendCommands::AddLocal {
            name,
            base_dir,
            description,
            default,
        } => {
            let config = service
                .create(CreateBackendRequest {
                    name,
                    settings: BackendSettings::Local(LocalSettings { base_dir }),
                    description,
                    is_default: default,
                    is_active: None,
                    created_by: None,
                })
                .await?;
            print_json(&config)
        }
        BackendCommands::AddS3 {
            name,
            bucket,
            access_key,
            secret_key,
            endpoint,
            region,
            public_url,
            path_style,
            description,
            default,
        } => {
            let settings = BackendSettings::S3(S3Settings {
                bucket_name: bucket,
                access_key,
                secret_key,
                endpoint_url: endpoint,
                region_name: region,
                public_url,
                force_path_style: path_style,
            });
            let config = service
                .create(CreateBackendRequest {
                    name,
                    settings,
                    description,
                    is_default: default,
                    is_active: None,
                    created_by: None,
                })
                .await?;
            print_json(&config)
        }
        BackendCommands::Update {
            id,
            name,
            description,
            active,
            default,
        } => {
            let config = service
                .update(
                    id,
                    UpdateBackendRequest {
                        name,
                        settings: None,
                        description,
                        is_active: active,
                        is_default: default,
                    },
                )
                .await?;
            print_json(&config)
        }
        BackendCommands::SetDefault { id } => print_json(&service.set_default(id).await?),
        BackendCommands::Delete { id } => {
            service.delete(id).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        BackendCommands::Test { id } => {
            service.test_connection(id).await?;
            print_json(&serde_json::json!({ "id": id, "reachable": true }))
        }
        BackendCommands::Export {
            credentials,
            output,
        } => {
            let document = service
                .export(credentials.into(), vault.encryption.as_ref())
                .await?;
            match output {
                Some(output) => {
                    let json = serde_json::to_vec_pretty(&document)?;
                    tokio::fs::write(&output, json)
                        .await
                        .with_context(|| format!("Cannot write {}", output.display()))?;
                    tracing::info!(
                        path = %output.display(),
                        total = document.total_count,
                        "Export written"
                    );
                    Ok(())
                }
                None => print_json(&document),
            }
        }
        BackendCommands::Import { file, replace } => {
            let raw = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Cannot read {}", file.display()))?;
            let document: ExportDocument =
                serde_json::from_slice(&raw).context("Not a backend export document")?;
            let report = service
                .import(document, replace, vault.encryption.as_ref())
                .await?;
            print_json(&report)
        }
    }
}

async fn folders(command: FolderCommands, vault: &VaultServices) -> anyhow::Result<()> {
    let service = &vault.folders;
    match command {
        FolderCommands::List { owner, parent } => {
            print_json(&service.list_children(owner, parent).await?)
        }
        FolderCommands::Create {
            owner,
            name,
            parent,
        } => {
            let folder = service
                .create(
                    owner,
                    CreateFolderRequest {
                        name,
                        parent_id: parent,
                    },
                )
                .await?;
            print_json(&folder)
        }
        FolderCommands::Rename { owner, id, name } => {
            print_json(&service.rename(owner, id, &name).await?)
        }
        FolderCommands::Move { owner, to, ids } => {
            print_json(&service.move_folders(owner, &ids, to).await?)
        }
        FolderCommands::Mkpath { owner, base, path } => {
            let id = service.ensure_path(owner, base, &path).await?;
            print_json(&serde_json::json!({ "folder_id": id }))
        }
        FolderCommands::Delete {
            owner,
            subtree,
            ids,
        } => print_json(&service.soft_delete(owner, &ids, scope(subtree)).await?),
    }
}

async fn recycle(command: RecycleCommands, vault: &VaultServices) -> anyhow::Result<()> {
    let service = &vault.recycle;
    match command {
        RecycleCommands::List { owner } => print_json(&service.list(owner).await?),
        RecycleCommands::DeleteFiles { owner, ids } => {
            let files = service.soft_delete_files(owner, &ids).await?;
            print_json(&serde_json::json!({ "files": files }))
        }
        RecycleCommands::Restore {
            owner,
            files,
            folders,
            subtree,
        } => print_json(
            &service
                .restore(owner, &files, &folders, scope(subtree))
                .await?,
        ),
        RecycleCommands::Purge {
            owner,
            files,
            folders,
        } => print_json(&service.purge(owner, &files, &folders).await?),
        RecycleCommands::Empty { owner } => print_json(&service.empty(owner).await?),
    }
}
