use serde_derive::Serialize;

/// A tracked report definition. `id` is assigned by the remote service
/// and never changes; the interval override, when set, supersedes the
/// category default.
#[derive(Debug, Clone, Serialize)]
pub struct ReportDefinition {
    pub id: String,
    pub name: Option<String>,
    pub category: String,
    pub interval_hours: Option<i64>,
}

impl ReportDefinition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => RequestStatus::Completed,
            "failed" => RequestStatus::Failed,
            _ => RequestStatus::Pending,
        }
    }
}

/// Persisted lifecycle state of one submitted remote request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub report_id: String,
    pub status: RequestStatus,
    pub requested_at: Option<String>,
    pub completed_at: Option<String>,
    pub output_path: Option<String>,
}

/// A definition joined with its most recent request, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionStatus {
    #[serde(flatten)]
    pub definition: ReportDefinition,
    pub latest_request: Option<RequestRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_json_flattens_definition_fields() {
        let status = DefinitionStatus {
            definition: ReportDefinition {
                id: "123456".to_string(),
                name: Some("Yearly".to_string()),
                category: "activity".to_string(),
                interval_hours: Some(2),
            },
            latest_request: Some(RequestRecord {
                request_id: "REQ1".to_string(),
                report_id: "123456".to_string(),
                status: RequestStatus::Completed,
                requested_at: Some("2025-04-12T10:00:00".to_string()),
                completed_at: Some("2025-04-12T10:01:00".to_string()),
                output_path: Some("/tmp/yearly.xml".to_string()),
            }),
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["id"], "123456");
        assert_eq!(v["interval_hours"], 2);
        assert_eq!(v["latest_request"]["status"], "completed");
        assert_eq!(v["latest_request"]["output_path"], "/tmp/yearly.xml");
    }

    #[test]
    fn unknown_status_strings_parse_as_pending() {
        assert_eq!(RequestStatus::parse("completed"), RequestStatus::Completed);
        assert_eq!(RequestStatus::parse(""), RequestStatus::Pending);
        assert_eq!(RequestStatus::parse("garbage"), RequestStatus::Pending);
    }
}
