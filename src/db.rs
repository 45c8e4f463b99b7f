//! MySQL-backed work store
//!
//! Implements [`WorkStore`] over sqlx with the statements of the schema
//! contract: string coordinate columns `x`/`y` (the fingerprint text) plus
//! indexed decimal projections `xd`/`yd` cast server-side, insert-ignore
//! upserts against the `(xd, yd)` uniqueness constraint, and `INSERT …
//! SELECT` promotion/seeding.
//!
//! Cross-worker mutual exclusion uses MySQL named locks: one lock serializes
//! every checkout against the status table, another serializes known-set
//! flushes. Flushes therefore block flushes but never block checkouts.
//! Table names come from configuration and are interpolated into the
//! statement text (identifiers cannot be bound); all values are bound.

use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, Row};

use crate::config::{DbConfig, SchemaConfig};
use crate::point::Point;
use crate::scalar::Ctx;
use crate::store::{BatchStatus, StoreError, Task, WorkStore};

/// Seconds to wait on a named lock before giving up.
const LOCK_WAIT_SECS: i32 = 300;

/// A [`WorkStore`] over a MySQL connection pool.
#[derive(Debug)]
pub struct MySqlStore {
    pool: MySqlPool,
    working: String,
    known: String,
    status: String,
    decimal_precision: u32,
    decimal_scale: u32,
}

impl MySqlStore {
    /// Opens a connection pool from the configured connection and schema
    /// settings.
    pub async fn connect(db: &DbConfig, schema: &SchemaConfig) -> Result<Self, StoreError> {
        let options = MySqlConnectOptions::new()
            .host(&db.db_server)
            .username(&db.db_user)
            .password(&db.db_password)
            .database(&db.db_database_name);
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            working: schema.db_table_name_working.clone(),
            known: schema.db_table_name_known.clone(),
            status: schema.db_table_name_status.clone(),
            decimal_precision: schema.db_point_decimal_digits_precision,
            decimal_scale: schema.db_point_decimal_digits_scale,
        })
    }

    fn flush_lock(&self) -> String {
        format!("{}.flush", self.known)
    }

    fn checkout_lock(&self) -> String {
        format!("{}.checkout", self.status)
    }

    fn insert_known_sql(&self) -> String {
        format!(
            "INSERT INTO `{known}` (`x`,`y`,`xd`,`yd`) \
             VALUES (?,?,CAST(? AS DECIMAL({p},{s})),CAST(? AS DECIMAL({p},{s}))) \
             ON DUPLICATE KEY UPDATE `id`=`id`",
            known = self.known,
            p = self.decimal_precision,
            s = self.decimal_scale,
        )
    }

    async fn claim_task(
        &self,
        conn: &mut PoolConnection<MySql>,
        batch_id: i32,
        client_id: i16,
    ) -> Result<Option<Task>, StoreError> {
        let select = format!(
            "SELECT `id`,`point_id`,`iteration` FROM `{status}` \
             WHERE `client_id` IS NULL AND `batch_id` = ? \
             ORDER BY `point_id` LIMIT 1",
            status = self.status,
        );
        let Some(row) = sqlx::query(&select)
            .bind(batch_id)
            .fetch_optional(&mut **conn)
            .await?
        else {
            return Ok(None);
        };

        let id: i64 = row.try_get(0)?;
        let point_id: i64 = row.try_get(1)?;
        let iteration: i16 = row.try_get(2)?;
        let iteration = u8::try_from(iteration).map_err(|_| {
            StoreError::MalformedRow(format!("task {id}: iteration {iteration} out of range"))
        })?;
        let start_time = now();

        let update = format!(
            "UPDATE `{status}` SET `client_id`=?,`is_running`=1,`start_time`=? \
             WHERE `id`=?",
            status = self.status,
        );
        sqlx::query(&update)
            .bind(client_id)
            .bind(start_time)
            .bind(id)
            .execute(&mut **conn)
            .await?;

        Ok(Some(Task {
            id,
            batch_id,
            client_id: Some(client_id),
            point_id,
            iteration,
            is_running: true,
            is_done: false,
            has_error: false,
            error_info: None,
            start_time: Some(start_time),
            end_time: None,
        }))
    }

    async fn load_points(&self, ctx: &Ctx, sql: &str, after: Option<i64>) -> Result<Vec<Point>, StoreError> {
        let query = match after {
            Some(after) => sqlx::query(sql).bind(after),
            None => sqlx::query(sql),
        };
        let rows = query.fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let x: String = row.try_get(0)?;
            let y: String = row.try_get(1)?;
            let id: i64 = row.try_get(2)?;
            let point = Point::from_row(ctx, x.trim(), y.trim(), id)
                .map_err(|e| StoreError::MalformedRow(format!("point row {id}: {e}")))?;
            out.push(point);
        }
        Ok(out)
    }
}

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Acquires a MySQL named lock on this connection or fails after
/// [`LOCK_WAIT_SECS`].
async fn acquire_named_lock(
    conn: &mut PoolConnection<MySql>,
    name: &str,
) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT GET_LOCK(?, ?)")
        .bind(name)
        .bind(LOCK_WAIT_SECS)
        .fetch_one(&mut **conn)
        .await?;
    let granted: Option<i64> = row.try_get(0)?;
    if granted == Some(1) {
        Ok(())
    } else {
        Err(StoreError::LockUnavailable(name.to_owned()))
    }
}

/// Releases a named lock; failures are ignored because the session drop
/// releases it anyway.
async fn release_named_lock(conn: &mut PoolConnection<MySql>, name: &str) {
    let _ = sqlx::query("SELECT RELEASE_LOCK(?)")
        .bind(name)
        .fetch_optional(&mut **conn)
        .await;
}

impl WorkStore for MySqlStore {
    async fn insert_known(&self, point: &Point) -> Result<u64, StoreError> {
        let sql = self.insert_known_sql();
        let result = sqlx::query(&sql)
            .bind(&point.key().x)
            .bind(&point.key().y)
            .bind(&point.key().x)
            .bind(&point.key().y)
            .execute(&self.pool)
            .await?;
        Ok(u64::from(result.rows_affected() > 0))
    }

    async fn insert_many_known(&self, batch: &[Point]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let lock = self.flush_lock();
        let mut conn = self.pool.acquire().await?;
        acquire_named_lock(&mut conn, &lock).await?;
        let result = insert_batch(&mut conn, &self.insert_known_sql(), batch).await;
        release_named_lock(&mut conn, &lock).await;
        result
    }

    async fn load_working_after(&self, ctx: &Ctx, after: i64) -> Result<Vec<Point>, StoreError> {
        let sql = format!(
            "SELECT `x`,`y`,`id` FROM `{working}` WHERE `id` >= ? ORDER BY `x`,`y`",
            working = self.working,
        );
        self.load_points(ctx, &sql, Some(after)).await
    }

    async fn promote_known_to_working(&self, iteration: u8) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO `{working}` (`x`,`y`,`xd`,`yd`,`iteration_origin`) \
             SELECT `x`,`y`,`xd`,`yd`,? FROM `{known}` \
             ON DUPLICATE KEY UPDATE `{working}`.`id`=`{working}`.`id`",
            working = self.working,
            known = self.known,
        );
        sqlx::query(&sql)
            .bind(i16::from(iteration))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn seed_tasks(&self, batch_id: i32, iteration: u8) -> Result<u64, StoreError> {
        let sql = format!(
            "INSERT INTO `{status}` (`batch_id`,`point_id`,`iteration`) \
             SELECT ?,`id`,? FROM `{working}`",
            status = self.status,
            working = self.working,
        );
        let result = sqlx::query(&sql)
            .bind(batch_id)
            .bind(i16::from(iteration))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn checkout(&self, batch_id: i32, client_id: i16) -> Result<Option<Task>, StoreError> {
        let lock = self.checkout_lock();
        let mut conn = self.pool.acquire().await?;
        acquire_named_lock(&mut conn, &lock).await?;
        let result = self.claim_task(&mut conn, batch_id, client_id).await;
        release_named_lock(&mut conn, &lock).await;
        result
    }

    async fn checkin(&self, task: &mut Task) -> Result<(), StoreError> {
        task.is_running = false;
        task.is_done = true;
        task.end_time = Some(now());

        let sql = format!(
            "UPDATE `{status}` SET \
             `client_id`=?,`batch_id`=?,`is_running`=?,`is_done`=?,\
             `has_error`=?,`error_info`=?,`start_time`=?,`end_time`=? \
             WHERE `id`=?",
            status = self.status,
        );
        sqlx::query(&sql)
            .bind(task.client_id)
            .bind(task.batch_id)
            .bind(task.is_running)
            .bind(task.is_done)
            .bind(task.has_error)
            .bind(task.error_info.as_deref())
            .bind(task.start_time)
            .bind(task.end_time)
            .bind(task.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn batch_status(&self, batch_id: i32) -> Result<BatchStatus, StoreError> {
        let last_sql = format!(
            "SELECT MAX(`iteration`) FROM `{status}` \
             WHERE `is_done` = 1 AND `batch_id` = ?",
            status = self.status,
        );
        let last: Option<i16> = sqlx::query(&last_sql)
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        let last_complete_iteration = match last {
            Some(value) => Some(u8::try_from(value).map_err(|_| {
                StoreError::MalformedRow(format!("iteration {value} out of range"))
            })?),
            None => None,
        };

        let running_sql = format!(
            "SELECT MAX(`id`) FROM `{status}` \
             WHERE `is_done` = 0 AND `is_running` = 1 AND `batch_id` = ?",
            status = self.status,
        );
        let running: Option<i64> = sqlx::query(&running_sql)
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        let incomplete_sql = format!(
            "SELECT MAX(`id`) FROM `{status}` \
             WHERE `is_done` = 0 AND `batch_id` = ?",
            status = self.status,
        );
        let incomplete: Option<i64> = sqlx::query(&incomplete_sql)
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        Ok(BatchStatus {
            last_complete_iteration,
            is_currently_running: running.is_some(),
            any_incomplete: incomplete.is_some(),
        })
    }

    async fn load_known(&self, ctx: &Ctx) -> Result<Vec<Point>, StoreError> {
        let sql = format!(
            "SELECT `x`,`y`,`id` FROM `{known}` ORDER BY `x`,`y`",
            known = self.known,
        );
        self.load_points(ctx, &sql, None).await
    }
}

/// Runs the whole batch in one transaction on the lock-holding connection.
async fn insert_batch(
    conn: &mut PoolConnection<MySql>,
    sql: &str,
    batch: &[Point],
) -> Result<u64, StoreError> {
    let mut tx = conn.begin().await?;
    let mut affected = 0;
    for point in batch {
        let result = sqlx::query(sql)
            .bind(&point.key().x)
            .bind(&point.key().y)
            .bind(&point.key().x)
            .bind(&point.key().y)
            .execute(&mut *tx)
            .await?;
        affected += u64::from(result.rows_affected() > 0);
    }
    tx.commit().await?;
    Ok(affected)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbConfig, SchemaConfig};

    fn store() -> MySqlStore {
        // Statement-building only; the pool is lazy and never connects.
        let schema = SchemaConfig {
            db_table_name_working: "points_working".to_owned(),
            db_table_name_known: "points_known".to_owned(),
            db_table_name_status: "run_status".to_owned(),
            db_point_char_digits: 60,
            db_point_decimal_digits_precision: 65,
            db_point_decimal_digits_scale: 30,
        };
        let db = DbConfig {
            db_server: "localhost".to_owned(),
            db_user: "u".to_owned(),
            db_password: "p".to_owned(),
            db_database_name: "d".to_owned(),
        };
        let options = MySqlConnectOptions::new()
            .host(&db.db_server)
            .username(&db.db_user)
            .password(&db.db_password)
            .database(&db.db_database_name);
        MySqlStore {
            pool: MySqlPoolOptions::new().connect_lazy_with(options),
            working: schema.db_table_name_working,
            known: schema.db_table_name_known,
            status: schema.db_table_name_status,
            decimal_precision: schema.db_point_decimal_digits_precision,
            decimal_scale: schema.db_point_decimal_digits_scale,
        }
    }

    #[tokio::test]
    async fn upsert_statement_casts_the_decimal_projection() {
        let sql = store().insert_known_sql();
        assert!(sql.starts_with("INSERT INTO `points_known`"));
        assert!(sql.contains("CAST(? AS DECIMAL(65,30))"));
        assert!(sql.ends_with("ON DUPLICATE KEY UPDATE `id`=`id`"));
    }

    #[tokio::test]
    async fn lock_names_are_per_table() {
        let s = store();
        assert_eq!(s.flush_lock(), "points_known.flush");
        assert_eq!(s.checkout_lock(), "run_status.checkout");
    }
}
