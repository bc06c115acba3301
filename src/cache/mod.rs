//! Cache layer
//!
//! Public reads (catalog, blogs, podcasts) are cached in process with moka.
//! Writes invalidate by key pattern.
//!
//! ```rust,ignore
//! use vitrine::cache::{create_cache, keys, CacheLayer};
//!
//! let cache = create_cache(&config.cache);
//! cache.set(&keys::formation("rust"), &detail).await?;
//! cache.delete_pattern(keys::CATALOG_ALL).await?;
//! ```

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

pub use memory::MemoryCache;

/// Cache operations. Generic over the cached value, so used through the
/// concrete type rather than as a trait object.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key matching a glob pattern (`*` and `?`)
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

pub type SharedCache = Arc<MemoryCache>;

pub fn create_cache(config: &CacheConfig) -> SharedCache {
    Arc::new(MemoryCache::with_capacity_and_ttl(
        config.max_capacity,
        Duration::from_secs(config.ttl_seconds),
    ))
}

/// Cache key builders
pub mod keys {
    pub const CATALOG_ALL: &str = "catalog:*";
    pub const BLOGS_ALL: &str = "blogs:*";
    pub const PODCASTS_ALL: &str = "podcasts:*";

    pub fn formations(category: Option<&str>) -> String {
        format!("catalog:formations:{}", category.unwrap_or("all"))
    }

    pub fn formation(slug: &str) -> String {
        format!("catalog:formation:{}", slug)
    }

    pub fn upcoming_sessions(formation_id: Option<i64>) -> String {
        match formation_id {
            Some(id) => format!("catalog:upcoming:{}", id),
            None => "catalog:upcoming:all".to_string(),
        }
    }

    pub fn blog_page(page: i64, per_page: i64) -> String {
        format!("blogs:page:{}:{}", page, per_page)
    }

    pub fn blog(slug: &str) -> String {
        format!("blogs:slug:{}", slug)
    }

    pub fn podcasts() -> String {
        "podcasts:list".to_string()
    }

    pub fn podcast(slug: &str) -> String {
        format!("podcasts:slug:{}", slug)
    }
}
