//! Boundary to the remote report-generation service. The engine only
//! sees the two-method trait; the HTTP client is a thin wrapper.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;

pub const DEFAULT_BASE_URL: &str =
    "https://gdcdyn.interactivebrokers.com/Universal/servlet/FlexStatementService";

/// Asynchronous report service: submit returns a request id to poll,
/// fetch returns `None` until the report is ready. "Not yet ready" and
/// "never will be" are indistinguishable except by attempt exhaustion.
#[async_trait]
pub trait ReportService: Send + Sync {
    async fn submit_request(&self, definition_id: &str) -> Option<String>;
    async fn fetch_report(&self, request_id: &str) -> Option<String>;
}

pub struct FlexWebClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl FlexWebClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(token: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            base_url,
        }
    }

    async fn get_text(&self, url: &str) -> Option<String> {
        match self.http.get(url).send().await {
            Ok(resp) => match resp.text().await {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!("Failed to read service response body: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Could not reach report service: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ReportService for FlexWebClient {
    async fn submit_request(&self, definition_id: &str) -> Option<String> {
        let url = format!(
            "{}.SendRequest?t={}&q={}&v=3",
            self.base_url,
            urlencoding::encode(&self.token),
            urlencoding::encode(definition_id),
        );
        let body = self.get_text(&url).await?;
        let reference = extract_element_text(&body, "ReferenceCode");
        if reference.is_none() {
            let detail = extract_element_text(&body, "ErrorMessage")
                .unwrap_or_else(|| "no reference code in response".to_string());
            warn!("Submit rejected for definition {}: {}", definition_id, detail);
        }
        reference
    }

    async fn fetch_report(&self, request_id: &str) -> Option<String> {
        let url = format!(
            "{}.GetStatement?t={}&q={}&v=3",
            self.base_url,
            urlencoding::encode(&self.token),
            urlencoding::encode(request_id),
        );
        let body = self.get_text(&url).await?;
        if body.trim().is_empty() || is_not_ready(&body) {
            return None;
        }
        Some(body)
    }
}

/// The service answers polls with a small error document until the
/// report is compiled.
fn is_not_ready(body: &str) -> bool {
    body.len() < 4096 && extract_element_text(body, "ErrorCode").is_some()
}

fn extract_element_text(xml: &str, element: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == element.as_bytes() => {
                if let Ok(Event::Text(text)) = reader.read_event() {
                    return text.unescape().ok().map(|t| t.into_owned());
                }
                return None;
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBMIT_OK: &str = "<FlexStatementResponse timestamp=\"12 April, 2025 10:00 AM EDT\">\
         <Status>Success</Status><ReferenceCode>1234567890</ReferenceCode>\
         </FlexStatementResponse>";

    const SUBMIT_ERR: &str = "<FlexStatementResponse><Status>Fail</Status>\
         <ErrorCode>1012</ErrorCode><ErrorMessage>Token has expired.</ErrorMessage>\
         </FlexStatementResponse>";

    #[test]
    fn extracts_reference_code_from_submit_response() {
        assert_eq!(
            extract_element_text(SUBMIT_OK, "ReferenceCode").as_deref(),
            Some("1234567890")
        );
    }

    #[test]
    fn missing_reference_code_yields_none() {
        assert_eq!(extract_element_text(SUBMIT_ERR, "ReferenceCode"), None);
        assert_eq!(
            extract_element_text(SUBMIT_ERR, "ErrorMessage").as_deref(),
            Some("Token has expired.")
        );
    }

    #[test]
    fn error_document_counts_as_not_ready() {
        assert!(is_not_ready(
            "<FlexStatementResponse><ErrorCode>1019</ErrorCode>\
             <ErrorMessage>Statement generation in progress.</ErrorMessage>\
             </FlexStatementResponse>"
        ));
    }

    #[test]
    fn report_content_is_ready_even_if_it_mentions_errors() {
        // A real report larger than the error-document ceiling must not
        // be mistaken for a not-ready answer.
        let mut report = String::from("<FlexQueryResponse><ErrorCode>0</ErrorCode>");
        report.push_str(&"<Trade/>".repeat(1024));
        report.push_str("</FlexQueryResponse>");
        assert!(!is_not_ready(&report));
    }
}
