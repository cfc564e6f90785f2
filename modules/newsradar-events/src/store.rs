//! InteractionStore: append plus per-cell range scan, backed by Postgres.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use newsradar_common::{CellId, EventKind, GeoPoint, InteractionEvent, NewInteraction};

// ---------------------------------------------------------------------------
// InteractionStore
// ---------------------------------------------------------------------------

/// The persisted user interaction log. Read-only from the trending engine's
/// point of view, apart from the ingestion path's `append`.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Append one event. The store assigns `seq`, `id` and, if absent, `created_at`.
    async fn append(&self, event: NewInteraction) -> Result<InteractionEvent>;

    /// Append many events. Default implementation appends one by one.
    async fn append_batch(&self, events: Vec<NewInteraction>) -> Result<Vec<InteractionEvent>> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            out.push(self.append(event).await?);
        }
        Ok(out)
    }

    /// Events whose point resolves to `cell` with `created_at >= since`, in `seq` order.
    async fn scan_cell(&self, cell: &CellId, since: DateTime<Utc>) -> Result<Vec<InteractionEvent>>;
}

#[async_trait]
impl<S: InteractionStore + ?Sized> InteractionStore for Arc<S> {
    async fn append(&self, event: NewInteraction) -> Result<InteractionEvent> {
        (**self).append(event).await
    }

    async fn append_batch(&self, events: Vec<NewInteraction>) -> Result<Vec<InteractionEvent>> {
        (**self).append_batch(events).await
    }

    async fn scan_cell(&self, cell: &CellId, since: DateTime<Utc>) -> Result<Vec<InteractionEvent>> {
        (**self).scan_cell(cell, since).await
    }
}

// ---------------------------------------------------------------------------
// PgInteractionStore
// ---------------------------------------------------------------------------

const INSERT_EVENT: &str = r#"
    INSERT INTO interaction_events (id, article_id, user_id, event_type, lat, lon, cell, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, now()))
    RETURNING seq, id, article_id, user_id, event_type, lat, lon, cell, created_at
"#;

const SCAN_CELL: &str = r#"
    SELECT seq, id, article_id, user_id, event_type, lat, lon, cell, created_at
    FROM interaction_events
    WHERE cell = $1 AND created_at >= $2
    ORDER BY seq ASC
"#;

#[derive(Clone)]
pub struct PgInteractionStore {
    pool: PgPool,
}

impl PgInteractionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the interaction table and its per-cell scan index if missing.
    ///
    /// `article_id` is nullable: deleting an article detaches its events
    /// instead of removing them.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interaction_events (
                seq         BIGSERIAL        PRIMARY KEY,
                id          UUID             NOT NULL UNIQUE,
                article_id  UUID,
                user_id     UUID,
                event_type  TEXT             NOT NULL,
                lat         DOUBLE PRECISION,
                lon         DOUBLE PRECISION,
                cell        TEXT,
                created_at  TIMESTAMPTZ      NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS interaction_events_cell_ts
             ON interaction_events (cell, created_at)",
        )
        .execute(&self.pool)
        .await?;

        info!("interaction_events table ready");
        Ok(())
    }

    async fn insert<'e, E>(executor: E, event: NewInteraction) -> Result<InteractionEvent>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, EventRow>(INSERT_EVENT)
            .bind(Uuid::new_v4())
            .bind(event.article_id)
            .bind(event.user_id)
            .bind(event.kind.as_str())
            .bind(event.point.map(|p| p.lat))
            .bind(event.point.map(|p| p.lon))
            .bind(event.cell.as_ref().map(|c| c.as_str().to_string()))
            .bind(event.created_at)
            .fetch_one(executor)
            .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl InteractionStore for PgInteractionStore {
    async fn append(&self, event: NewInteraction) -> Result<InteractionEvent> {
        Self::insert(&self.pool, event).await
    }

    async fn append_batch(&self, events: Vec<NewInteraction>) -> Result<Vec<InteractionEvent>> {
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            out.push(Self::insert(&mut *tx, event).await?);
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn scan_cell(&self, cell: &CellId, since: DateTime<Utc>) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(SCAN_CELL)
            .bind(cell.as_str())
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct EventRow(InteractionEvent);

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;

        let event_type: String = row.try_get("event_type")?;
        let kind: EventKind = event_type.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "event_type".into(),
            source: Box::new(e),
        })?;

        let lat: Option<f64> = row.try_get("lat")?;
        let lon: Option<f64> = row.try_get("lon")?;
        let point = match (lat, lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        };
        let cell: Option<String> = row.try_get("cell")?;

        Ok(EventRow(InteractionEvent {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            article_id: row.try_get("article_id")?,
            user_id: row.try_get("user_id")?,
            kind,
            point,
            cell: cell.map(CellId::new),
            created_at: row.try_get("created_at")?,
        }))
    }
}

// ---------------------------------------------------------------------------
// Test utilities
// ---------------------------------------------------------------------------

#[cfg(feature = "test-utils")]
impl PgInteractionStore {
    /// Read all events (for tests).
    pub async fn read_all(&self) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT seq, id, article_id, user_id, event_type, lat, lon, cell, created_at
            FROM interaction_events
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
