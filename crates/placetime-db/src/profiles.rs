//! Profile repository implementation.

use sqlx::{Pool, Postgres, Row};

use placetime_core::{Error, Profile, Result};

/// PostgreSQL access to the `profiles` table.
#[derive(Clone)]
pub struct PgProfileRepository {
    pool: Pool<Postgres>,
}

impl PgProfileRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// All profiles whose content comes from a feed.
    pub async fn list_feed_driven(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query(
            "SELECT pid, feed_url, follower_count
             FROM profiles
             WHERE feed_driven AND feed_url <> ''
             ORDER BY pid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| -> std::result::Result<Profile, sqlx::Error> {
                Ok(Profile {
                    pid: row.try_get("pid")?,
                    feed_url: row.try_get("feed_url")?,
                    follower_count: row.try_get("follower_count")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::Database)
    }

    /// Create or replace a profile.
    pub async fn upsert(&self, profile: &Profile, feed_driven: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO profiles (pid, feed_url, follower_count, feed_driven)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (pid) DO UPDATE
             SET feed_url = EXCLUDED.feed_url,
                 follower_count = EXCLUDED.follower_count,
                 feed_driven = EXCLUDED.feed_driven",
        )
        .bind(&profile.pid)
        .bind(&profile.feed_url)
        .bind(profile.follower_count)
        .bind(feed_driven)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Remove a profile and, by cascade, its items.
    pub async fn delete(&self, pid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM profiles WHERE pid = $1")
            .bind(pid)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
