//! Example wrapping one slow lookup with each caching policy.
//!
//! Set `REDIS_URL` to put a Redis tier behind the local one; without it
//! everything stays in-process.

use advanced_cache::{
    CacheError, HybridStore, LoaderOptions, LoaderRegistry, LocalStore, RedisStore,
    RedisStoreConfig, Store, SwrCache, SwrOptions, TtlCache, blocking,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Product {
    sku: String,
    price_cents: u64,
}

#[derive(Debug, thiserror::Error)]
enum ShopError {
    #[error("unknown sku {0}")]
    UnknownSku(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

async fn fetch_product(sku: String) -> Result<Product, ShopError> {
    // Pretend this is a slow upstream call
    tokio::time::sleep(Duration::from_millis(200)).await;
    if sku.is_empty() {
        return Err(ShopError::UnknownSku(sku));
    }
    Ok(Product {
        price_cents: sku.len() as u64 * 199,
        sku,
    })
}

async fn build_store() -> Result<Arc<dyn Store>, CacheError> {
    if std::env::var("REDIS_URL").is_err() {
        return Ok(Arc::new(LocalStore::default()));
    }

    let redis: Arc<dyn Store> = Arc::new(RedisStore::new(RedisStoreConfig::from_env()).await?);
    let hybrid = HybridStore::new(None, Some(redis), Duration::from_secs(30))?;
    Ok(Arc::new(hybrid))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store().await?;
    println!("Using {} store", store.name());

    // Plain TTL
    let products = TtlCache::new("product:{}", Duration::from_secs(60), fetch_product)
        .with_store(store.clone());
    for _ in 0..2 {
        let started = Instant::now();
        let product = products.invoke("A-100".to_string()).await?;
        println!("ttl: {:?} in {:?}", product, started.elapsed());
    }

    // Stale-while-revalidate
    let prices = SwrCache::new(
        "price:{}",
        SwrOptions::new(Duration::from_millis(500), Duration::from_secs(10)),
        fetch_product,
    )
    .with_store(store.clone());
    prices.invoke("B-200".to_string()).await?;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let started = Instant::now();
    let stale = prices.invoke("B-200".to_string()).await?;
    println!("swr: stale {:?} in {:?}", stale, started.elapsed());
    prices.drain().await;

    // Periodic loader over a synchronous function
    let registry = LoaderRegistry::new();
    let catalog = registry
        .register(
            "catalog:size",
            blocking(|()| Ok::<_, ShopError>(std::process::id() as usize % 100)),
            LoaderOptions::new(Duration::from_secs(1))
                .store(store)
                .on_error(|e: &ShopError| eprintln!("catalog refresh failed: {}", e)),
        )
        .await;
    println!("loader: catalog size {}", catalog.get().await?);

    registry.shutdown(true).await;
    Ok(())
}
