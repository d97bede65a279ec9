use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rand::Rng;
use rusqlite::{params, OptionalExtension, Result};
use serde::Serialize;

use crate::core::error::{AppError, AppResult};

/// A shipment row as stored in the database.
#[derive(Debug, Clone, Serialize)]
pub struct Shipment {
    #[serde(skip)]
    pub id: i64,
    pub tracking_number: String,
    pub status: String,
    /// `;`-joined checkpoint entries `YYYY-MM-DD HH:MM - location - note`
    pub checkpoints: Option<String>,
    pub delivery_location: String,
    /// RFC 3339
    pub last_updated: String,
    pub recipient_email: Option<String>,
    /// RFC 3339
    pub created_at: String,
    pub origin_location: Option<String>,
    pub webhook_url: Option<String>,
    pub email_notifications: bool,
}

impl Shipment {
    /// Checkpoints split into individual entries.
    pub fn checkpoint_list(&self) -> Vec<String> {
        self.checkpoints
            .as_deref()
            .map(|s| s.split(';').filter(|c| !c.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Effective origin: explicit origin or the delivery location.
    pub fn origin_or_delivery(&self) -> &str {
        self.origin_location.as_deref().unwrap_or(&self.delivery_location)
    }
}

/// Fields accepted when creating or replacing a shipment.
#[derive(Debug, Clone, Default)]
pub struct ShipmentDraft {
    pub tracking_number: String,
    pub status: String,
    pub checkpoints: Option<String>,
    pub delivery_location: String,
    pub recipient_email: Option<String>,
    pub origin_location: Option<String>,
    pub webhook_url: Option<String>,
    pub email_notifications: bool,
}

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and ensures
/// the schema exists.
///
/// # Arguments
///
/// * `database_path` - Path to SQLite database file
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    let conn = pool.get()?;
    if let Err(e) = migrate_schema(&conn) {
        log::warn!("Failed to migrate schema: {}", e);
    }

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is automatically returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Ensure the shipments table, any late-added columns and the indexes
/// exist. Additive only; never drops or rewrites data.
fn migrate_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shipments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tracking_number TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL,
            checkpoints TEXT,
            delivery_location TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            recipient_email TEXT,
            created_at TEXT NOT NULL,
            origin_location TEXT,
            webhook_url TEXT,
            email_notifications INTEGER DEFAULT 1
        )",
        [],
    )?;

    // Columns that were added after the first release; bring old
    // databases up to date without touching existing rows.
    let mut stmt = conn.prepare("PRAGMA table_info(shipments)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }

    for (name, ddl) in [
        ("origin_location", "ALTER TABLE shipments ADD COLUMN origin_location TEXT"),
        ("webhook_url", "ALTER TABLE shipments ADD COLUMN webhook_url TEXT"),
        (
            "email_notifications",
            "ALTER TABLE shipments ADD COLUMN email_notifications INTEGER DEFAULT 1",
        ),
    ] {
        if !columns.iter().any(|c| c == name) {
            conn.execute(ddl, [])?;
        }
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tracking_number ON shipments (tracking_number)",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_status ON shipments (status)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_delivery_location ON shipments (delivery_location)",
        [],
    )?;

    Ok(())
}

fn row_to_shipment(row: &rusqlite::Row<'_>) -> Result<Shipment> {
    Ok(Shipment {
        id: row.get(0)?,
        tracking_number: row.get(1)?,
        status: row.get(2)?,
        checkpoints: row.get(3)?,
        delivery_location: row.get(4)?,
        last_updated: row.get(5)?,
        recipient_email: row.get(6)?,
        created_at: row.get(7)?,
        origin_location: row.get(8)?,
        webhook_url: row.get(9)?,
        email_notifications: row.get::<_, Option<i64>>(10)?.unwrap_or(1) != 0,
    })
}

const SHIPMENT_COLUMNS: &str = "id, tracking_number, status, checkpoints, delivery_location, last_updated, \
     recipient_email, created_at, origin_location, webhook_url, email_notifications";

/// Fetch a shipment by tracking number.
pub fn get_shipment(conn: &DbConnection, tracking_number: &str) -> Result<Option<Shipment>> {
    conn.query_row(
        &format!("SELECT {} FROM shipments WHERE tracking_number = ?1", SHIPMENT_COLUMNS),
        params![tracking_number],
        row_to_shipment,
    )
    .optional()
}

/// Insert or replace a shipment. Returns the stored row.
///
/// On update `created_at` is preserved; everything else comes from the
/// draft. `origin_location` defaults to the delivery location.
pub fn upsert_shipment(conn: &DbConnection, draft: &ShipmentDraft) -> Result<Shipment> {
    let now = Utc::now().to_rfc3339();
    let origin = draft
        .origin_location
        .clone()
        .unwrap_or_else(|| draft.delivery_location.clone());

    let existing = get_shipment(conn, &draft.tracking_number)?;
    match existing {
        Some(_) => {
            conn.execute(
                "UPDATE shipments SET status = ?2, checkpoints = ?3, delivery_location = ?4,
                     last_updated = ?5, recipient_email = ?6, origin_location = ?7,
                     webhook_url = ?8, email_notifications = ?9
                 WHERE tracking_number = ?1",
                params![
                    draft.tracking_number,
                    draft.status,
                    draft.checkpoints,
                    draft.delivery_location,
                    now,
                    draft.recipient_email,
                    origin,
                    draft.webhook_url,
                    draft.email_notifications as i64,
                ],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO shipments (tracking_number, status, checkpoints, delivery_location,
                     last_updated, recipient_email, created_at, origin_location, webhook_url,
                     email_notifications)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    draft.tracking_number,
                    draft.status,
                    draft.checkpoints,
                    draft.delivery_location,
                    now,
                    draft.recipient_email,
                    now,
                    origin,
                    draft.webhook_url,
                    draft.email_notifications as i64,
                ],
            )?;
        }
    }

    conn.query_row(
        &format!("SELECT {} FROM shipments WHERE tracking_number = ?1", SHIPMENT_COLUMNS),
        params![draft.tracking_number],
        row_to_shipment,
    )
}

/// Persist a simulation step: status, checkpoints and the update stamp.
pub fn update_progress(
    conn: &DbConnection,
    tracking_number: &str,
    status: &str,
    checkpoints: &str,
) -> Result<usize> {
    conn.execute(
        "UPDATE shipments SET status = ?2, checkpoints = ?3, last_updated = ?4 WHERE tracking_number = ?1",
        params![tracking_number, status, checkpoints, Utc::now().to_rfc3339()],
    )
}

/// Update the recipient email for a shipment.
pub fn set_recipient_email(conn: &DbConnection, tracking_number: &str, email: &str) -> Result<usize> {
    conn.execute(
        "UPDATE shipments SET recipient_email = ?2, last_updated = ?3 WHERE tracking_number = ?1",
        params![tracking_number, email, Utc::now().to_rfc3339()],
    )
}

/// Update the per-shipment webhook URL.
pub fn set_webhook_url(conn: &DbConnection, tracking_number: &str, webhook_url: &str) -> Result<usize> {
    conn.execute(
        "UPDATE shipments SET webhook_url = ?2, last_updated = ?3 WHERE tracking_number = ?1",
        params![tracking_number, webhook_url, Utc::now().to_rfc3339()],
    )
}

/// Flip email notifications for a shipment. Returns the new value, or
/// `None` when the shipment does not exist.
pub fn toggle_email_notifications(conn: &DbConnection, tracking_number: &str) -> Result<Option<bool>> {
    let Some(shipment) = get_shipment(conn, tracking_number)? else {
        return Ok(None);
    };
    let new_value = !shipment.email_notifications;
    conn.execute(
        "UPDATE shipments SET email_notifications = ?2 WHERE tracking_number = ?1",
        params![tracking_number, new_value as i64],
    )?;
    Ok(Some(new_value))
}

/// Delete a shipment. Returns true when a row was removed.
pub fn delete_shipment(conn: &DbConnection, tracking_number: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM shipments WHERE tracking_number = ?1",
        params![tracking_number],
    )?;
    Ok(affected > 0)
}

/// Paginated list of tracking numbers, ordered by tracking number.
/// Returns the page and the total row count.
pub fn list_tracking_numbers(
    conn: &DbConnection,
    page: u32,
    per_page: u32,
    status_filter: Option<&str>,
) -> Result<(Vec<String>, u64)> {
    let page = page.max(1);
    let offset = (page - 1) * per_page;

    let (rows, total) = match status_filter {
        Some(status) => {
            let mut stmt = conn.prepare(
                "SELECT tracking_number FROM shipments WHERE status = ?1
                 ORDER BY tracking_number LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![status, per_page, offset], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>>>()?;
            let total: u64 = conn.query_row(
                "SELECT COUNT(*) FROM shipments WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?;
            (rows, total)
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT tracking_number FROM shipments ORDER BY tracking_number LIMIT ?1 OFFSET ?2")?;
            let rows = stmt
                .query_map(params![per_page, offset], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>>>()?;
            let total: u64 = conn.query_row("SELECT COUNT(*) FROM shipments", [], |row| row.get(0))?;
            (rows, total)
        }
    };

    Ok((rows, total))
}

/// Search over tracking number, status and delivery location.
/// The query must be pre-sanitized (see `core::validation::sanitize_input`).
pub fn search_shipments(conn: &DbConnection, query: &str, page: u32, per_page: u32) -> Result<(Vec<String>, u64)> {
    let page = page.max(1);
    let offset = (page - 1) * per_page;
    let pattern = format!("%{}%", query.to_lowercase());

    let mut stmt = conn.prepare(
        "SELECT tracking_number FROM shipments
         WHERE LOWER(tracking_number) LIKE ?1
            OR LOWER(status) LIKE ?1
            OR LOWER(delivery_location) LIKE ?1
         ORDER BY tracking_number LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(params![pattern, per_page, offset], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>>>()?;

    let total: u64 = conn.query_row(
        "SELECT COUNT(*) FROM shipments
         WHERE LOWER(tracking_number) LIKE ?1
            OR LOWER(status) LIKE ?1
            OR LOWER(delivery_location) LIKE ?1",
        params![pattern],
        |row| row.get(0),
    )?;

    Ok((rows, total))
}

/// Shipment counts grouped by status.
pub fn count_by_status(conn: &DbConnection) -> Result<Vec<(String, u64)>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM shipments GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

/// Total number of shipments.
pub fn count_all(conn: &DbConnection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM shipments", [], |row| row.get(0))
}

/// Generates a unique tracking number: `TRK` + timestamp + 6 random
/// uppercase alphanumerics. Gives up after 10 collisions.
pub fn generate_unique_id(conn: &DbConnection) -> AppResult<String> {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    for _ in 0..10 {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let mut rng = rand::rng();
        let suffix: String = (0..6)
            .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
            .collect();
        let candidate = format!("TRK{}{}", timestamp, suffix);

        if get_shipment(conn, &candidate)?.is_none() {
            return Ok(candidate);
        }
    }

    Err(AppError::Validation(
        "Failed to generate unique tracking ID after 10 attempts".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_pool() -> DbPool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        // Leak the tempdir so the file outlives the pool in this test
        std::mem::forget(dir);
        create_pool(path.to_str().unwrap()).unwrap()
    }

    fn draft(tn: &str) -> ShipmentDraft {
        ShipmentDraft {
            tracking_number: tn.to_string(),
            status: "Pending".to_string(),
            checkpoints: None,
            delivery_location: "Lagos, NG".to_string(),
            recipient_email: None,
            origin_location: None,
            webhook_url: None,
            email_notifications: true,
        }
    }

    #[test]
    fn test_upsert_insert_then_update() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();

        let created = upsert_shipment(&conn, &draft("TRK1")).unwrap();
        assert_eq!(created.status, "Pending");
        assert_eq!(created.origin_location.as_deref(), Some("Lagos, NG"));

        let mut updated = draft("TRK1");
        updated.status = "In_Transit".to_string();
        updated.recipient_email = Some("user@example.com".to_string());
        let stored = upsert_shipment(&conn, &updated).unwrap();
        assert_eq!(stored.status, "In_Transit");
        assert_eq!(stored.recipient_email.as_deref(), Some("user@example.com"));
        // created_at survives the update
        assert_eq!(stored.created_at, created.created_at);
        assert_eq!(count_all(&conn).unwrap(), 1);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        assert!(get_shipment(&conn, "TRK404").unwrap().is_none());
    }

    #[test]
    fn test_update_progress_and_checkpoint_list() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        upsert_shipment(&conn, &draft("TRK2")).unwrap();

        update_progress(&conn, "TRK2", "In_Transit", "2025-01-01 12:00 - Lagos, NG - Processed").unwrap();
        let shipment = get_shipment(&conn, "TRK2").unwrap().unwrap();
        assert_eq!(shipment.status, "In_Transit");
        assert_eq!(shipment.checkpoint_list().len(), 1);
    }

    #[test]
    fn test_delete() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        upsert_shipment(&conn, &draft("TRK3")).unwrap();
        assert!(delete_shipment(&conn, "TRK3").unwrap());
        assert!(!delete_shipment(&conn, "TRK3").unwrap());
    }

    #[test]
    fn test_list_pagination_and_filter() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        for i in 0..7 {
            let mut d = draft(&format!("TRK-{}", i));
            if i % 2 == 0 {
                d.status = "Delivered".to_string();
            }
            upsert_shipment(&conn, &d).unwrap();
        }

        let (page1, total) = list_tracking_numbers(&conn, 1, 5, None).unwrap();
        assert_eq!(total, 7);
        assert_eq!(page1.len(), 5);
        let (page2, _) = list_tracking_numbers(&conn, 2, 5, None).unwrap();
        assert_eq!(page2.len(), 2);

        let (delivered, delivered_total) = list_tracking_numbers(&conn, 1, 10, Some("Delivered")).unwrap();
        assert_eq!(delivered_total, 4);
        assert_eq!(delivered.len(), 4);
    }

    #[test]
    fn test_search_matches_status_and_location() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        let mut a = draft("TRKAAA");
        a.status = "Delayed".to_string();
        upsert_shipment(&conn, &a).unwrap();
        let mut b = draft("TRKBBB");
        b.delivery_location = "London, UK".to_string();
        upsert_shipment(&conn, &b).unwrap();

        let (hits, total) = search_shipments(&conn, "delayed", 1, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits, vec!["TRKAAA".to_string()]);

        let (hits, _) = search_shipments(&conn, "london", 1, 10).unwrap();
        assert_eq!(hits, vec!["TRKBBB".to_string()]);
    }

    #[test]
    fn test_toggle_email_notifications() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        upsert_shipment(&conn, &draft("TRK5")).unwrap();

        assert_eq!(toggle_email_notifications(&conn, "TRK5").unwrap(), Some(false));
        assert_eq!(toggle_email_notifications(&conn, "TRK5").unwrap(), Some(true));
        assert_eq!(toggle_email_notifications(&conn, "TRK404").unwrap(), None);
    }

    #[test]
    fn test_generate_unique_id_shape() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        let id = generate_unique_id(&conn).unwrap();
        assert!(id.starts_with("TRK"));
        assert_eq!(id.len(), 3 + 14 + 6);
        assert!(crate::core::validation::sanitize_tracking_number(&id).is_some());
    }

    #[test]
    fn test_count_by_status() {
        let pool = test_pool();
        let conn = get_connection(&pool).unwrap();
        upsert_shipment(&conn, &draft("TRK6")).unwrap();
        let mut d = draft("TRK7");
        d.status = "Delivered".to_string();
        upsert_shipment(&conn, &d).unwrap();

        let counts = count_by_status(&conn).unwrap();
        assert!(counts.contains(&("Pending".to_string(), 1)));
        assert!(counts.contains(&("Delivered".to_string(), 1)));
    }
}
