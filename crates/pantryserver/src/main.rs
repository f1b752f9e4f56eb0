mod routes;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use pantryadapters::{standard_adapters, FileStore};
use pantryruntime::{EngineConfig, FlowRuntime, InMemoryDedupLedger};
use routes::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting pantry flow engine server");

    let config = EngineConfig::from_env();
    let data_dir = std::env::var("PANTRY_DATA_DIR").ok();

    let mut builder = FlowRuntime::builder(config.clone()).adapters(standard_adapters(&config));
    let store = match &data_dir {
        Some(dir) => {
            let store = Arc::new(FileStore::new(dir)?);
            builder = builder.credentials(store.clone());
            Some(store)
        }
        None => None,
    };
    let runtime = Arc::new(
        builder
            .build()
            .context("PANTRY_VAULT_KEY must be set to 64 hex characters")?,
    );

    info!("Runtime initialized with {} node kinds", runtime.registry().list_node_kinds().len());

    // The scheduler only runs when there is a store to read flows from.
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let scheduler_task = store.map(|store| {
        let scheduler = runtime.scheduler(store, Arc::new(InMemoryDedupLedger::new()));
        tokio::spawn(async move {
            scheduler
                .run_forever(async {
                    let _ = stop_rx.await;
                })
                .await;
        })
    });

    let app_state = web::Data::new(AppState {
        runtime: runtime.clone(),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    let _ = stop_tx.send(());
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }

    Ok(())
}
