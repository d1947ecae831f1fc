use anyhow::{Context, Result};
use bucket_proxy::{
    client::{
        storage_client::StorageClient,
        upload_widget::{SelectedFile, UploadWidget},
    },
    config::{AppConfig, Backend, Command},
    models::object::ListOptions,
    routes::routes::app,
    services::{bucket::SharedStore, local_bucket::LocalBucket, memory_bucket::MemoryBucket},
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    match command {
        Command::Serve => serve(cfg).await,
        Command::Migrate => {
            LocalBucket::open(&cfg.database_url, &cfg.storage_dir)
                .await
                .context("opening local bucket")?;
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Command::Upload {
            path,
            key,
            content_type,
            max_size,
            accept,
        } => {
            let client = StorageClient::new(&cfg.server_url);
            let file = SelectedFile::from_path(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;

            let mut widget = UploadWidget::new();
            if let Some(max_size) = max_size {
                widget = widget.with_max_size(max_size);
            }
            if let Some(accept) = accept {
                widget = widget.with_accept(accept);
            }
            widget.select_file(Some(file));
            if let Some(error) = widget.error() {
                anyhow::bail!("{}", error);
            }

            // An explicit key or type bypasses the widget's generated defaults.
            let uploaded = if key.is_some() || content_type.is_some() {
                let file = widget
                    .selected_file()
                    .context("no file selected")?;
                client
                    .upload_file(file, key.as_deref(), content_type.as_deref())
                    .await?
            } else {
                match widget.upload(&client).await {
                    Some(uploaded) => uploaded,
                    None => anyhow::bail!(
                        "{}",
                        widget.error().unwrap_or("Failed to upload file")
                    ),
                }
            };
            println!("{}\t{}{}", uploaded.key, cfg.server_url, uploaded.url);
            Ok(())
        }
        Command::Delete { key } => {
            let client = StorageClient::new(&cfg.server_url);
            client.delete_file(&key).await?;
            println!("deleted {}", key);
            Ok(())
        }
        Command::Url { key } => {
            let client = StorageClient::new(&cfg.server_url);
            println!("{}{}", cfg.server_url, client.file_url(&key));
            Ok(())
        }
        Command::List {
            prefix,
            limit,
            cursor,
        } => {
            let client = StorageClient::new(&cfg.server_url);
            let page = client
                .list_files(&ListOptions {
                    prefix,
                    limit,
                    cursor,
                })
                .await?;
            for object in &page.objects {
                println!(
                    "{}\t{}\t{}",
                    object.key,
                    object.size_bytes,
                    object.content_type.as_deref().unwrap_or("-")
                );
            }
            if let Some(cursor) = page.cursor {
                println!("next cursor: {}", cursor);
            }
            Ok(())
        }
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    tracing::info!("Starting bucket-proxy with config: {:?}", cfg);

    // --- Bind the bucket; failure leaves the server running unbound ---
    let store = connect_store(&cfg).await;
    let state = AppState::new(store).with_max_body_bytes(cfg.max_body_bytes);
    let router = app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;

    Ok(())
}

async fn connect_store(cfg: &AppConfig) -> Option<SharedStore> {
    match cfg.backend {
        Backend::Local => match LocalBucket::open(&cfg.database_url, &cfg.storage_dir).await {
            Ok(bucket) => {
                tracing::info!("Bound local bucket at {}", cfg.storage_dir);
                Some(Arc::new(bucket))
            }
            Err(err) => {
                tracing::error!("Failed to open local bucket: {}", err);
                None
            }
        },
        Backend::Memory => {
            tracing::info!("Bound in-memory bucket");
            Some(Arc::new(MemoryBucket::new()))
        }
        Backend::None => {
            tracing::warn!("No bucket configured; storage requests will fail");
            None
        }
    }
}
