use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;

use prepnexus_data::cache::{Cache, CacheStore, LocalCache, NullCache, RedisCache};
use prepnexus_data::config::{self, AppConfig, CacheBackendKind};
use prepnexus_data::{router, telemetry, AppMetrics, DataAccess, DataAccessConfig, SeaOrmConnector};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load().context("Failed to load configuration")?;
    telemetry::init(&config.observability);

    tracing::info!(
        name = %config.app.name,
        version = %config.app.version,
        environment = %config.app.environment,
        "Starting service"
    );

    let metrics = AppMetrics::with_config(Some(&config));
    let cache = CacheStore::from_config(cache_backend(&config).await, &config.cache);
    let db = DataAccess::connect(
        SeaOrmConnector::from_config(&config.database),
        DataAccessConfig::from_app(&config)?,
        cache,
    )
    .await
    .context("Failed to open database connection pool")?;
    db.start_health_monitor();

    let workers = match config.server.workers {
        0 => num_cpus::get(),
        n => n,
    };
    let bind = (config.server.host.clone(), config.server.port);
    tracing::info!(host = %bind.0, port = bind.1, workers, "HTTP server listening");

    let data = web::Data::new(db.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(web::Data::new(metrics.clone()))
            .configure(router::route::<SeaOrmConnector>)
    })
    .workers(workers)
    .shutdown_timeout(config.app.shutdown_timeout)
    .bind(bind)?
    .run();

    let result = server.await;

    tracing::info!("HTTP server stopped, closing database pool");
    db.close().await;

    result.context("HTTP server failed")
}

/// Pick the cache backend; an unreachable Redis degrades to no caching
async fn cache_backend(config: &AppConfig) -> Arc<dyn Cache> {
    match config.cache.backend {
        CacheBackendKind::Redis => match RedisCache::from_config(&config.cache).await {
            Ok(redis) => {
                tracing::info!(prefix = %config.cache.prefix, "Using Redis query cache");
                Arc::new(redis)
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "Redis unavailable, query caching disabled");
                Arc::new(NullCache::new())
            }
        },
        CacheBackendKind::Local => {
            tracing::info!("Using in-process query cache");
            Arc::new(LocalCache::new())
        }
        CacheBackendKind::None => {
            tracing::info!("Query caching disabled");
            Arc::new(NullCache::new())
        }
    }
}

