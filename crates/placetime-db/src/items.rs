//! Item repository implementation.

use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use placetime_core::{Error, Item, MediaKind, Result, UpsertItem};

const ITEM_COLUMNS: &str = "id, pid, event, text, link, image, media";

/// PostgreSQL access to the `items` table.
#[derive(Clone)]
pub struct PgItemRepository {
    pool: Pool<Postgres>,
}

impl PgItemRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_item_row(row: PgRow) -> Result<Item> {
        let media: Option<String> = row.try_get("media").map_err(Error::Database)?;
        let media = media.as_deref().map(str::parse::<MediaKind>).transpose()?;
        Ok(Item {
            id: row.try_get("id").map_err(Error::Database)?,
            pid: row.try_get("pid").map_err(Error::Database)?,
            event: row.try_get("event").map_err(Error::Database)?,
            text: row.try_get("text").map_err(Error::Database)?,
            link: row.try_get("link").map_err(Error::Database)?,
            image: row.try_get("image").map_err(Error::Database)?,
            media,
        })
    }

    /// Claim up to `limit` items still lacking an image, newest first.
    ///
    /// Claimed rows leave the "needs image" set in the same statement, and
    /// rows locked by a concurrent claim are skipped.
    pub async fn grab_needing_images(&self, limit: usize) -> Result<Vec<Item>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "UPDATE items
             SET needs_image = FALSE, updated_at = now()
             WHERE id IN (
                 SELECT id FROM items
                 WHERE needs_image
                 ORDER BY event DESC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            ITEM_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_item_row).collect()
    }

    /// Return claimed items to the "needs image" set unless they have an
    /// image by now. Returns the number of rows released.
    pub async fn release(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE items
             SET needs_image = TRUE, updated_at = now()
             WHERE id = ANY($1) AND image IS NULL",
        )
        .bind(ids.to_vec())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Insert an item, or refresh the text, link and time of an existing one.
    ///
    /// New items without an image join the "needs image" set.
    pub async fn upsert(&self, item: &UpsertItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO items (id, pid, event, text, link, image, needs_image)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE
             SET event = EXCLUDED.event,
                 text = EXCLUDED.text,
                 link = EXCLUDED.link,
                 updated_at = now()",
        )
        .bind(&item.id)
        .bind(&item.pid)
        .bind(item.event)
        .bind(&item.text)
        .bind(&item.link)
        .bind(&item.image)
        .bind(item.image.is_none())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Item> {
        let row = sqlx::query(&format!("SELECT {} FROM items WHERE id = $1", ITEM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("item {}", id)))?;
        Self::parse_item_row(row)
    }

    /// Persist every mutable field of an existing item.
    pub async fn update(&self, item: &Item) -> Result<()> {
        let result = sqlx::query(
            "UPDATE items
             SET pid = $2, event = $3, text = $4, link = $5, image = $6, media = $7,
                 needs_image = needs_image AND $8,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(&item.id)
        .bind(&item.pid)
        .bind(item.event)
        .bind(&item.text)
        .bind(&item.link)
        .bind(&item.image)
        .bind(item.media.map(|m| m.as_str()))
        .bind(item.image.is_none())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("item {}", item.id)));
        }
        Ok(())
    }
}
