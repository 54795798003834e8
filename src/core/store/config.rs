use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::ReportStore;

const TOKEN_KEY: &str = "token";

impl ReportStore {
    // --- Service token ---

    pub async fn set_token(&self, token: &str) -> Result<()> {
        self.set_config(TOKEN_KEY, token).await
    }

    pub async fn get_token(&self) -> Result<Option<String>> {
        self.get_config(TOKEN_KEY).await
    }

    pub async fn unset_token(&self) -> Result<()> {
        self.unset_config(TOKEN_KEY).await?;
        Ok(())
    }

    // --- Key/value settings ---

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub async fn unset_config(&self, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows_deleted = db.execute("DELETE FROM config WHERE key = ?1", params![key])?;
        Ok(rows_deleted > 0)
    }

    /// All user-visible settings; the token and schema version are
    /// bookkeeping, not configuration.
    pub async fn list_config(&self) -> Result<Vec<(String, String)>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT key, value FROM config
             WHERE key != 'token' AND key != 'db_version' ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
