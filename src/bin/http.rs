#[cfg(all(feature = "http_api", feature = "sqlite"))]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use leave_calendar::calendar::{
        DatasetCache, DatasetProvider, FileDatasetProvider, TableDatasetProvider,
    };
    use leave_calendar::http_api::{self, AppState};
    use leave_calendar::notification::{LogSink, NotificationDispatcher};
    use leave_calendar::{ServiceConfig, SqliteStudentStore};
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    let addr: SocketAddr = config.http_addr.parse()?;

    let provider: Box<dyn DatasetProvider> = match &config.dataset_path {
        Some(path) => Box::new(FileDatasetProvider::new(path)),
        None => Box::new(TableDatasetProvider::default()),
    };
    let mut cache = DatasetCache::new();
    let dataset = cache.load(provider.as_ref(), config.dataset_timeout())?;
    tracing::info!(years = dataset.list_years().len(), "calendar dataset loaded");

    let store = SqliteStudentStore::new(&config.database_path)?;
    let state = AppState::new(
        Arc::new(store),
        NotificationDispatcher::new(LogSink),
        dataset,
    )
    .with_store_timeout(config.store_timeout());

    tracing::info!(%addr, "leave-calendar HTTP API listening");
    http_api::serve(addr, state).await?;
    Ok(())
}

#[cfg(not(all(feature = "http_api", feature = "sqlite")))]
fn main() {
    eprintln!("Rebuild with the `http_api` and `sqlite` features to enable the HTTP server.");
}
