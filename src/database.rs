//! Alert persistence
//!
//! SQLite-backed alert store with the query surface the dashboard consumes.
//! The store assigns the row id; the pipeline supplies the enrichment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::alert::Alert;
use crate::geoip::GeoInfo;

/// Thread-safe database wrapper.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// One persisted alert row.
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub id: i64,
    pub message: String,
    pub category: String,
    pub src_ip: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: String,
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counts for one attacking source.
#[derive(Debug, Clone)]
pub struct AttackerSummary {
    pub src_ip: String,
    pub country: Option<String>,
    pub alert_count: i64,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open database: {}", path.as_ref().display()))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message TEXT NOT NULL,
                category TEXT NOT NULL,
                src_ip TEXT NOT NULL,
                country TEXT,
                country_code TEXT,
                latitude REAL,
                longitude REAL,
                severity TEXT DEFAULT 'medium',
                metadata TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_category ON alerts(category);
            CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);
            CREATE INDEX IF NOT EXISTS idx_alerts_ip ON alerts(src_ip);
            CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
            "#,
        )?;
        Ok(())
    }

    /// Persist one enriched alert; returns the server-assigned id.
    pub fn insert_alert(&self, alert: &Alert, geo: &GeoInfo) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alerts
             (message, category, src_ip, country, country_code, latitude, longitude, severity, metadata, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                alert.message,
                alert.category.to_string(),
                alert.source.to_string(),
                geo.country,
                geo.country_code,
                geo.latitude,
                geo.longitude,
                alert.severity.to_string(),
                alert.meta_json(),
                alert.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, message, category, src_ip, country, country_code,
                    latitude, longitude, severity, metadata, timestamp
             FROM alerts ORDER BY timestamp DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                let metadata: Option<String> = row.get(9)?;
                let timestamp: String = row.get(10)?;
                Ok(AlertRecord {
                    id: row.get(0)?,
                    message: row.get(1)?,
                    category: row.get(2)?,
                    src_ip: row.get(3)?,
                    country: row.get(4)?,
                    country_code: row.get(5)?,
                    latitude: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                    longitude: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
                    severity: row.get(8)?,
                    metadata: metadata
                        .and_then(|m| serde_json::from_str(&m).ok())
                        .unwrap_or_default(),
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total number of persisted alerts.
    pub fn total_alerts(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Alert counts grouped by category.
    pub fn category_counts(&self) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT category, COUNT(*) FROM alerts GROUP BY category")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }

    /// Hourly alert counts over the trailing `hours` window, oldest first.
    pub fn alerts_over_time(&self, hours: i64) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT strftime('%Y-%m-%d %H:00:00', timestamp) AS hour, COUNT(*)
             FROM alerts
             WHERE timestamp >= datetime('now', ?)
             GROUP BY hour ORDER BY hour",
        )?;
        let rows = stmt
            .query_map([format!("-{} hours", hours)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sources with the most alerts, descending.
    pub fn top_attackers(&self, limit: usize) -> Result<Vec<AttackerSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT src_ip, country, COUNT(*) as alert_count
             FROM alerts GROUP BY src_ip ORDER BY alert_count DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(AttackerSummary {
                    src_ip: row.get(0)?,
                    country: row.get(1)?,
                    alert_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
