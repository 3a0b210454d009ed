//! SQLite reader for the pulled data file
//!
//! Reads every row of the location and vehicle tables as untyped string
//! records. NULL cells become empty strings.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, SqliteConnection};

use super::{ParsedRecords, Record, RecordParser};
use crate::error::AppError;

pub struct SqliteRecordParser {
    location_table: String,
    vehicle_table: String,
}

impl SqliteRecordParser {
    pub fn new(location_table: &str, vehicle_table: &str) -> Result<Self, AppError> {
        let ident = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .map_err(|e| AppError::Internal(e.to_string()))?;

        for table in [location_table, vehicle_table] {
            if !ident.is_match(table) {
                return Err(AppError::Validation(format!(
                    "Invalid table name: {}",
                    table
                )));
            }
        }

        Ok(Self {
            location_table: location_table.to_string(),
            vehicle_table: vehicle_table.to_string(),
        })
    }

    async fn read_table(
        conn: &mut SqliteConnection,
        table: &str,
    ) -> Result<Vec<Record>, AppError> {
        let sql = format!("SELECT * FROM \"{}\"", table);
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| AppError::ParseFailure(format!("{}: {}", table, e)))?;

        Ok(rows.iter().map(row_to_record).collect())
    }
}

#[async_trait]
impl RecordParser for SqliteRecordParser {
    async fn parse(&self, path: &Path) -> Result<ParsedRecords, AppError> {
        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .connect()
            .await
            .map_err(|e| AppError::ParseFailure(format!("{}: {}", path.display(), e)))?;

        let locations = Self::read_table(&mut conn, &self.location_table).await;
        let vehicles = Self::read_table(&mut conn, &self.vehicle_table).await;

        if let Err(e) = conn.close().await {
            tracing::debug!("[Records] Closing {} failed: {}", path.display(), e);
        }

        let parsed = ParsedRecords {
            locations: locations?,
            vehicles: vehicles?,
        };

        tracing::debug!(
            "[Records] Parsed {} location and {} vehicle records",
            parsed.locations.len(),
            parsed.vehicles.len()
        );

        Ok(parsed)
    }
}

fn row_to_record(row: &SqliteRow) -> Record {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), cell_text(row, col.ordinal())))
        .collect()
}

/// Render one cell as text, whatever its storage class.
fn cell_text(row: &SqliteRow, idx: usize) -> String {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|n| n.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|n| n.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_fixture(path: &Path) {
        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();

        for stmt in [
            "CREATE TABLE DWJJOB (dwjLoad TEXT, dwjSeq INTEGER, dwjLat REAL, dwjNote TEXT)",
            "INSERT INTO DWJJOB VALUES ('L100', 1, 51.5, 'gate 4')",
            "INSERT INTO DWJJOB VALUES ('L100', 2, 51.6, NULL)",
            "INSERT INTO DWJJOB VALUES ('L200', 1, 52.0, '')",
            "CREATE TABLE DWVVEH (dwvVin TEXT, dwvLoad TEXT)",
            "INSERT INTO DWVVEH VALUES ('VIN1', 'L100')",
        ] {
            sqlx::query(stmt).execute(&mut conn).await.unwrap();
        }
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_parse_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sql.db");
        create_fixture(&path).await;

        let parser = SqliteRecordParser::new("DWJJOB", "DWVVEH").unwrap();
        let parsed = parser.parse(&path).await.unwrap();

        assert_eq!(parsed.locations.len(), 3);
        assert_eq!(parsed.vehicles.len(), 1);

        let first = &parsed.locations[0];
        assert_eq!(
            first.columns().collect::<Vec<_>>(),
            vec!["dwjLoad", "dwjSeq", "dwjLat", "dwjNote"]
        );
        assert_eq!(first.get("dwjSeq"), Some("1"));
        assert_eq!(first.get("dwjLat"), Some("51.5"));
        assert_eq!(parsed.locations[1].get("dwjNote"), Some(""));
        assert_eq!(parsed.vehicles[0].get("dwvVin"), Some("VIN1"));
    }

    #[tokio::test]
    async fn test_missing_table_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sql.db");
        create_fixture(&path).await;

        let parser = SqliteRecordParser::new("DWJJOB", "NOPE").unwrap();
        let err = parser.parse(&path).await.unwrap_err();
        assert!(matches!(err, AppError::ParseFailure(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let parser = SqliteRecordParser::new("DWJJOB", "DWVVEH").unwrap();
        let err = parser.parse(&dir.path().join("absent.db")).await.unwrap_err();
        assert!(matches!(err, AppError::ParseFailure(_)));
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        assert!(SqliteRecordParser::new("DWJJOB; DROP", "DWVVEH").is_err());
        assert!(SqliteRecordParser::new("DWJJOB", "1abc").is_err());
    }
}
