//! Notification repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::database::models::NotificationDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ms;
use crate::notification::Notification;
use crate::{Error, Result};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, content, is_read, created_at, expires_at";

/// Bind parameters per inserted row.
const BINDS_PER_ROW: usize = 7;

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`.
const SQLITE_MAX_VARIABLES: usize = 32_766;

/// Rows per `INSERT` statement so a statement stays under the variable limit.
const ROWS_PER_STATEMENT: usize = SQLITE_MAX_VARIABLES / BINDS_PER_ROW;

/// Persistence operations consumed by the notification pipeline.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Bulk insert, returning the rows as stored.
    ///
    /// Rows whose id is already present are skipped and not returned, so
    /// re-submitting a batch after an ambiguous failure never yields a row twice.
    async fn insert_batch(&self, notifications: &[Notification]) -> Result<Vec<Notification>>;

    /// Delete every row whose expiry is strictly before `now`. Returns the deleted count.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// All notifications for a user, newest first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Notification>>;

    async fn get(&self, id: Uuid) -> Result<Notification>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert `rows` in one transaction, split into statements of at most
    /// [`ROWS_PER_STATEMENT`] rows.
    async fn insert_rows(
        pool: &SqlitePool,
        rows: &[NotificationDbModel],
    ) -> Result<Vec<NotificationDbModel>> {
        let mut tx = pool.begin().await?;
        let mut stored = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let inserted = Self::insert_statement(chunk)
                .build_query_as::<NotificationDbModel>()
                .fetch_all(&mut *tx)
                .await?;
            stored.extend(inserted);
        }
        tx.commit().await?;
        Ok(stored)
    }

    fn insert_statement(rows: &[NotificationDbModel]) -> QueryBuilder<'_, Sqlite> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO notifications ({NOTIFICATION_COLUMNS}) "));
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.id.clone())
                .push_bind(row.user_id.clone())
                .push_bind(row.notification_type.clone())
                .push_bind(row.content.clone())
                .push_bind(row.is_read)
                .push_bind(row.created_at)
                .push_bind(row.expires_at);
        });
        builder.push(format!(
            " ON CONFLICT(id) DO NOTHING RETURNING {NOTIFICATION_COLUMNS}"
        ));
        builder
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn insert_batch(&self, notifications: &[Notification]) -> Result<Vec<Notification>> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<NotificationDbModel> =
            notifications.iter().map(NotificationDbModel::from).collect();

        let pool = &self.pool;
        let submitted = rows.as_slice();
        let stored = retry_on_sqlite_busy("insert_notifications_batch", || {
            Self::insert_rows(pool, submitted)
        })
        .await?;

        // RETURNING order is unspecified; report rows in submission order.
        let mut by_id: HashMap<String, NotificationDbModel> =
            stored.into_iter().map(|row| (row.id.clone(), row)).collect();
        rows.iter()
            .filter_map(|row| by_id.remove(&row.id))
            .map(Notification::try_from)
            .collect()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let now_ms = datetime_to_ms(now);
        let pool = &self.pool;
        let result = retry_on_sqlite_busy("delete_expired_notifications", || async move {
            sqlx::query(
                "DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at < ?",
            )
            .bind(now_ms)
            .execute(pool)
            .await
            .map_err(Error::from)
        })
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationDbModel>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE user_id = ? ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Notification> {
        let row = sqlx::query_as::<_, NotificationDbModel>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("Notification", id.to_string()))?;

        Notification::try_from(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_memory_pool, run_migrations};
    use chrono::{Duration, TimeZone};

    async fn repo() -> SqlxNotificationRepository {
        let pool = init_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxNotificationRepository::new(pool)
    }

    fn notification(user_id: &str, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            notification_type: "COMMENT_ADDED".to_string(),
            content: format!("User {user_id} commented on Post p-1"),
            is_read: false,
            created_at,
            expires_at: created_at + Duration::days(7),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_batch_returns_stored_rows_in_order() {
        let repo = repo().await;
        let batch: Vec<_> = (0..5)
            .map(|i| notification("u1", t0() + Duration::seconds(i)))
            .collect();

        let stored = repo.insert_batch(&batch).await.unwrap();
        assert_eq!(stored, batch);
    }

    #[tokio::test]
    async fn insert_batch_skips_existing_ids() {
        let repo = repo().await;
        let first = notification("u1", t0());
        repo.insert_batch(std::slice::from_ref(&first)).await.unwrap();

        let second = notification("u1", t0() + Duration::seconds(1));
        let stored = repo
            .insert_batch(&[first.clone(), second.clone()])
            .await
            .unwrap();
        assert_eq!(stored, vec![second]);
        assert_eq!(repo.list_by_user("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_larger_than_one_statement_is_stored_whole() {
        let repo = repo().await;
        let batch: Vec<_> = (0..ROWS_PER_STATEMENT as i64 + 320)
            .map(|i| notification("bulk", t0() + Duration::milliseconds(i)))
            .collect();

        let stored = repo.insert_batch(&batch).await.unwrap();
        assert_eq!(stored, batch);
        assert_eq!(repo.list_by_user("bulk").await.unwrap().len(), batch.len());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let repo = repo().await;
        assert!(repo.insert_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_by_user_is_newest_first_and_scoped() {
        let repo = repo().await;
        let older = notification("u1", t0());
        let newer = notification("u1", t0() + Duration::hours(1));
        let other = notification("u2", t0());
        repo.insert_batch(&[older.clone(), newer.clone(), other])
            .await
            .unwrap();

        let listed = repo.list_by_user("u1").await.unwrap();
        assert_eq!(listed, vec![newer, older]);
    }

    #[tokio::test]
    async fn delete_expired_uses_strict_comparison() {
        let repo = repo().await;
        let n = notification("u1", t0());
        repo.insert_batch(std::slice::from_ref(&n)).await.unwrap();

        assert_eq!(repo.delete_expired(n.expires_at).await.unwrap(), 0);
        assert!(repo.get(n.id).await.is_ok());

        let later = n.expires_at + Duration::milliseconds(1);
        assert_eq!(repo.delete_expired(later).await.unwrap(), 1);
        assert_eq!(repo.delete_expired(later).await.unwrap(), 0);
        assert!(matches!(repo.get(n.id).await, Err(Error::NotFound { .. })));
    }
}
