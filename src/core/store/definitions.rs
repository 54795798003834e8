use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::ReportStore;
use super::types::{DefinitionStatus, ReportDefinition};

fn definition_from_row(row: &Row<'_>) -> rusqlite::Result<ReportDefinition> {
    Ok(ReportDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "activity".to_string()),
        interval_hours: row.get(3)?,
    })
}

impl ReportStore {
    pub async fn add_definition(
        &self,
        id: &str,
        name: &str,
        category: &str,
        interval_hours: Option<i64>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO reports (id, name, category, interval_hours)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, name, category, interval_hours],
        )?;
        Ok(())
    }

    pub async fn remove_definition(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows_deleted = db.execute("DELETE FROM reports WHERE id = ?1", params![id])?;
        Ok(rows_deleted > 0)
    }

    pub async fn rename_definition(&self, id: &str, new_name: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE reports SET name = ?1 WHERE id = ?2",
            params![new_name, id],
        )?;
        Ok(rows > 0)
    }

    /// Set or clear the per-definition interval override (hours).
    pub async fn set_definition_interval(&self, id: &str, hours: Option<i64>) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE reports SET interval_hours = ?1 WHERE id = ?2",
            params![hours, id],
        )?;
        Ok(rows > 0)
    }

    pub async fn get_definition(&self, id: &str) -> Result<Option<ReportDefinition>> {
        let db = self.db.lock().await;
        let def = db
            .query_row(
                "SELECT id, name, category, interval_hours FROM reports WHERE id = ?1",
                params![id],
                definition_from_row,
            )
            .optional()?;
        Ok(def)
    }

    pub async fn list_definitions(&self) -> Result<Vec<ReportDefinition>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, category, interval_hours FROM reports ORDER BY added_on",
        )?;
        let rows = stmt.query_map([], definition_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Every definition joined with its most recent request, in
    /// insertion order. Drives `report list` and forced batch fetches.
    pub async fn list_definitions_with_status(&self) -> Result<Vec<DefinitionStatus>> {
        let definitions = self.list_definitions().await?;
        let mut results = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let latest_request = self.latest_request(&definition.id).await?;
            results.push(DefinitionStatus {
                definition,
                latest_request,
            });
        }
        Ok(results)
    }
}
