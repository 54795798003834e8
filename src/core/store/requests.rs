use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use rusqlite::{OptionalExtension, Row, params};

use super::types::{ReportDefinition, RequestRecord, RequestStatus};
use super::{ReportStore, now_stamp, stamp};
use crate::core::policy;

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<RequestRecord> {
    Ok(RequestRecord {
        request_id: row.get(0)?,
        report_id: row.get(1)?,
        status: RequestStatus::parse(&row.get::<_, Option<String>>(2)?.unwrap_or_default()),
        requested_at: row.get(3)?,
        completed_at: row.get(4)?,
        output_path: row.get(5)?,
    })
}

impl ReportStore {
    /// Record a freshly submitted request. One row per submission; the
    /// row is only ever transitioned afterwards, never resubmitted.
    pub async fn add_request(&self, request_id: &str, report_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO requests (request_id, report_id, status, requested_at)
             VALUES (?1, ?2, 'pending', ?3)",
            params![request_id, report_id, now_stamp()],
        )?;
        Ok(())
    }

    /// Transition a request to a terminal state. `completed` also sets
    /// `completed_at` and the output path; every transition touches
    /// `last_updated`, the field freshness checks prefer.
    pub async fn update_request_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        output_path: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let now = now_stamp();
        if status == RequestStatus::Completed {
            db.execute(
                "UPDATE requests
                 SET status = ?1, completed_at = ?2, output_path = ?3, last_updated = ?2
                 WHERE request_id = ?4",
                params![status.as_str(), now, output_path, request_id],
            )?;
        } else {
            db.execute(
                "UPDATE requests SET status = ?1, last_updated = ?2 WHERE request_id = ?3",
                params![status.as_str(), now, request_id],
            )?;
        }
        Ok(())
    }

    pub async fn get_request(&self, request_id: &str) -> Result<Option<RequestRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT request_id, report_id, status, requested_at, completed_at, output_path
                 FROM requests WHERE request_id = ?1",
                params![request_id],
                request_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn latest_request(&self, report_id: &str) -> Result<Option<RequestRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT request_id, report_id, status, requested_at, completed_at, output_path
                 FROM requests WHERE report_id = ?1
                 ORDER BY requested_at DESC LIMIT 1",
                params![report_id],
                request_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Definitions whose most recent successful download is older than
    /// their effective interval. A definition with no completed request
    /// at all is always due. Both timestamp columns are checked: rows
    /// written before `last_updated` existed only carry `completed_at`.
    pub async fn due_definitions(&self, now: NaiveDateTime) -> Result<Vec<ReportDefinition>> {
        let definitions = self.list_definitions().await?;
        let db = self.db.lock().await;

        let mut due = Vec::new();
        for definition in definitions {
            let hours =
                policy::effective_interval_hours(&definition.category, definition.interval_hours);
            let cutoff = stamp(now - Duration::hours(hours));

            let fresh: Option<String> = db
                .query_row(
                    "SELECT request_id FROM requests
                     WHERE report_id = ?1
                       AND status = 'completed'
                       AND (last_updated > ?2 OR completed_at > ?2)
                     ORDER BY last_updated DESC
                     LIMIT 1",
                    params![definition.id, cutoff],
                    |row| row.get(0),
                )
                .optional()?;

            if fresh.is_none() {
                due.push(definition);
            }
        }
        Ok(due)
    }

    /// Overwrite a request's timestamps directly, bypassing the normal
    /// transitions. Freshness tests need rows at exact offsets.
    #[cfg(test)]
    pub(crate) async fn set_request_timestamps(
        &self,
        request_id: &str,
        last_updated: Option<NaiveDateTime>,
        completed_at: Option<NaiveDateTime>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE requests SET last_updated = ?1, completed_at = ?2 WHERE request_id = ?3",
            params![last_updated.map(stamp), completed_at.map(stamp), request_id],
        )?;
        Ok(())
    }
}
