//! HTTP JSON adapters for the external collaborators
//!
//! Each adapter talks to one configured base URL. A tool bridge answering
//! 401 or 403 is reported as a permission problem so the user can fix it.

use super::extractor::{ContentExtractor, ExtractedFields};
use super::research::{ResearchGenerator, ResearchOutput};
use super::tools::{ToolError, ToolResult, ToolService};
use crate::database::EntryType;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Shared client for one base URL
#[derive(Clone)]
pub struct HttpEndpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEndpoint {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("QuickCapture/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Remote content extractor: `POST {base}/extract`
pub struct HttpContentExtractor {
    endpoint: HttpEndpoint,
}

impl HttpContentExtractor {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractedFields> {
        let response = self
            .endpoint
            .request(Method::POST, "extract")
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Extraction(format!("extractor returned {}", status)));
        }

        Ok(response.json().await?)
    }
}

/// Remote research generator: `POST {base}/research`
pub struct HttpResearchGenerator {
    endpoint: HttpEndpoint,
}

impl HttpResearchGenerator {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ResearchGenerator for HttpResearchGenerator {
    async fn generate(&self, text: &str, entry_type: EntryType) -> Result<ResearchOutput> {
        let response = self
            .endpoint
            .request(Method::POST, "research")
            .json(&json!({ "text": text, "entryType": entry_type }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Research(format!("research service returned {}", status)));
        }

        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReminderRequest<'a> {
    title: &'a str,
    notes: Option<&'a str>,
    due_date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CalendarRequest<'a> {
    title: &'a str,
    notes: Option<&'a str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactRequest<'a> {
    first_name: &'a str,
    last_name: Option<&'a str>,
    phone: Option<&'a str>,
    email: Option<&'a str>,
}

/// Tool bridge that performs the system side effects on our behalf
pub struct HttpToolService {
    endpoint: HttpEndpoint,
}

impl HttpToolService {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }

    async fn create<B: Serialize + Sync>(&self, path: &str, body: &B) -> ToolResult<String> {
        let response = self
            .endpoint
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let created: CreatedResource = response
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("unexpected bridge response: {}", e)))?;
        Ok(created.id)
    }

    async fn call(&self, method: Method, path: &str, body: Option<serde_json::Value>) -> ToolResult<()> {
        let mut request = self.endpoint.request(method, path);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        Ok(())
    }
}

/// Map a non-success bridge status to a tool error
fn classify_failure(status: StatusCode, body: &str) -> ToolError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ToolError::PermissionDenied(detail),
        _ => ToolError::Failed(detail),
    }
}

#[async_trait]
impl ToolService for HttpToolService {
    async fn create_reminder(
        &self,
        title: &str,
        notes: Option<&str>,
        due_date: Option<DateTime<Utc>>,
    ) -> ToolResult<String> {
        self.create(
            "reminders",
            &ReminderRequest {
                title,
                notes,
                due_date,
            },
        )
        .await
    }

    async fn create_calendar_event(
        &self,
        title: &str,
        notes: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ToolResult<String> {
        self.create(
            "calendar/events",
            &CalendarRequest {
                title,
                notes,
                start,
                end,
            },
        )
        .await
    }

    async fn create_contact(
        &self,
        first_name: &str,
        last_name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> ToolResult<String> {
        self.create(
            "contacts",
            &ContactRequest {
                first_name,
                last_name,
                phone,
                email,
            },
        )
        .await
    }

    async fn open_in_maps(&self, query: &str) -> ToolResult<()> {
        self.call(Method::POST, "maps/open", Some(json!({ "query": query })))
            .await
    }

    async fn delete_reminder(&self, id: &str) -> ToolResult<()> {
        self.call(Method::DELETE, &format!("reminders/{}", id), None).await
    }

    async fn delete_calendar_event(&self, id: &str) -> ToolResult<()> {
        self.call(Method::DELETE, &format!("calendar/events/{}", id), None)
            .await
    }

    async fn delete_contact(&self, id: &str) -> ToolResult<()> {
        self.call(Method::DELETE, &format!("contacts/{}", id), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_are_permission_denied() {
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "calendar access revoked"),
            ToolError::PermissionDenied(msg) if msg.contains("calendar access revoked")
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, ""),
            ToolError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            ToolError::Failed(_)
        ));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let endpoint = HttpEndpoint::new("http://localhost:8700/", None).unwrap();
        assert_eq!(endpoint.url("/reminders"), "http://localhost:8700/reminders");
        assert_eq!(endpoint.url("calendar/events"), "http://localhost:8700/calendar/events");
    }

    #[test]
    fn test_request_bodies_use_camel_case() {
        let body = serde_json::to_value(ContactRequest {
            first_name: "Jane",
            last_name: Some("Roe"),
            phone: None,
            email: Some("jane@example.com"),
        })
        .unwrap();
        assert_eq!(body["firstName"], "Jane");
        assert_eq!(body["lastName"], "Roe");
        assert!(body["phone"].is_null());
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_generic_failure() {
        // Port 9 (discard) is never served in test environments
        let endpoint = HttpEndpoint::new("http://127.0.0.1:9", None).unwrap();
        let tools = HttpToolService::new(endpoint);
        let result = tools.create_reminder("x", None, None).await;
        assert!(matches!(result, Err(ToolError::Failed(_))));
    }
}
