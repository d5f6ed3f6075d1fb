use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::postgres::PostgresStore;
use crate::router;
use crate::store::MemoryStore;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics = config.export_prometheus;

    let app = if config.memory_store {
        tracing::warn!("serving from the in-memory store; nothing will be persisted");
        router::router(Arc::new(MemoryStore::new()), config, metrics)
    } else {
        let store = PostgresStore::connect(&config)
            .await
            .expect("failed to connect to postgres");
        router::router(Arc::new(store), config, metrics)
    };

    tracing::info!("listening on {:?}", listener.local_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("failed to serve http");
}
