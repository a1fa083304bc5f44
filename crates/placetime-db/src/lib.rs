//! # placetime-db
//!
//! PostgreSQL datastore for the placetime fetcher.
//!
//! This crate provides:
//! - Connection pool management
//! - Profile and item repositories
//! - A [`Datastore`] implementation over both
//!
//! ## Example
//!
//! ```rust,ignore
//! use placetime_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/placetime").await?;
//!     for profile in db.profiles.list_feed_driven().await? {
//!         println!("{} -> {}", profile.pid, profile.feed_url);
//!     }
//!     Ok(())
//! }
//! ```

pub mod items;
pub mod pool;
pub mod profiles;

// Test fixtures for integration tests
pub mod test_fixtures;

use async_trait::async_trait;
use tracing::debug;

// Re-export core types
pub use placetime_core::*;

pub use items::PgItemRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use profiles::PgProfileRepository;

/// Combined database context with all repositories.
///
/// Every call borrows a pooled connection for its own duration only.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub profiles: PgProfileRepository,
    pub items: PgItemRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            profiles: PgProfileRepository::new(pool.clone()),
            items: PgItemRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

#[async_trait]
impl Datastore for Database {
    async fn feed_driven_profiles(&self) -> Result<Vec<Profile>> {
        self.profiles.list_feed_driven().await
    }

    async fn grab_items_needing_images(&self, limit: usize) -> Result<Vec<Item>> {
        let items = self.items.grab_needing_images(limit).await?;
        debug!(
            subsystem = "database",
            component = "items",
            limit,
            claimed = items.len(),
            "Claimed items needing images"
        );
        Ok(items)
    }

    async fn release_items(&self, ids: &[String]) -> Result<()> {
        let released = self.items.release(ids).await?;
        debug!(
            subsystem = "database",
            component = "items",
            requested = ids.len(),
            released,
            "Released claimed items"
        );
        Ok(())
    }

    async fn upsert_item(&self, item: UpsertItem) -> Result<()> {
        self.items.upsert(&item).await
    }

    async fn get_item(&self, id: &str) -> Result<Item> {
        self.items.get(id).await
    }

    async fn update_item(&self, item: &Item) -> Result<()> {
        self.items.update(item).await
    }
}
