use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, REFERER};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::models::EventCandidate;

const USER_AGENT: &str = "fiba-events/0.1";
const REFERER_URL: &str = "https://play.fiba3x3.com/events";

/// Something that can produce the current snapshot of upstream events.
pub trait EventSource {
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<Vec<EventCandidate>, FetchError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Bare(Vec<Value>),
    Envelope(SearchResponse),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Option<Vec<Value>>,
    total_count: Option<u64>,
}

impl SearchResponse {
    fn is_unrecognized(&self) -> bool {
        self.results.is_none() && self.total_count.is_none()
    }
}

/// Parses either the search envelope (`{"results": [...]}`) or a bare array.
/// A missing or null `results` field is an empty snapshot.
pub fn parse_response(body: &str) -> Result<Vec<EventCandidate>, FetchError> {
    let results = match serde_json::from_str::<Payload>(body)? {
        Payload::Bare(items) => items,
        Payload::Envelope(envelope) => {
            if envelope.is_unrecognized() {
                warn!("response has neither `results` nor `totalCount`; treating it as empty");
            }
            let items = envelope.results.unwrap_or_default();
            if let Some(total) = envelope.total_count {
                if total > items.len() as u64 {
                    warn!(
                        total,
                        returned = items.len(),
                        "upstream reports more events than it returned"
                    );
                }
            }
            items
        }
    };
    Ok(results.iter().map(EventCandidate::from_json).collect())
}

pub struct FibaApi {
    url: String,
    timeout: Duration,
    save_response_to: Option<PathBuf>,
    client: Client,
}

impl FibaApi {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self {
            url: url.into(),
            timeout,
            save_response_to: None,
            client,
        })
    }

    /// Writes each raw response body to `path` before parsing it.
    pub fn save_response_to(mut self, path: PathBuf) -> Self {
        self.save_response_to = Some(path);
        self
    }

    fn map_transport(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout.as_secs())
        } else {
            FetchError::Http(err)
        }
    }
}

impl EventSource for FibaApi {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> Result<Vec<EventCandidate>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(REFERER, REFERER_URL)
            .send()
            .map_err(|err| self.map_transport(err))?;
        let status = response.status();
        let body = response.text().map_err(|err| self.map_transport(err))?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(bytes = body.len(), "fetched event listing");

        if let Some(path) = &self.save_response_to {
            match fs::write(path, &body) {
                Ok(()) => info!("saved raw response to {:?}", path),
                Err(err) => warn!("failed to save raw response to {:?}: {err}", path),
            }
        }

        parse_response(&body)
    }
}

/// Replays a previously saved listing from disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl EventSource for JsonFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<Vec<EventCandidate>, FetchError> {
        let body = fs::read_to_string(&self.path).map_err(|source| FetchError::Io {
            path: self.path.clone(),
            source,
        })?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE_RESPONSE: &str = r#"{
        "results": [
            {
                "id": "2ee22e60-c68b-459a-98f3-8c00cb11472d",
                "name": "3X3 SC BORIK 2025",
                "registrationIsOpen": true,
                "startDate": "2025-09-06T00:00:00",
                "endDate": "2025-09-07T23:59:59",
                "city": "Banja Luka"
            },
            {
                "id": "simulated-new-002",
                "name": "SIMULATED: Bihac Basketball Festival",
                "registrationIsOpen": false,
                "startDate": "2026-03-15T00:00:00",
                "endDate": "2026-03-16T23:59:59"
            }
        ],
        "totalCount": 2,
        "currentPageNum": 1
    }"#;

    #[test]
    fn parses_search_envelope() {
        let candidates = parse_response(SAMPLE_RESPONSE).expect("parse response");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].city.as_deref(), Some("Banja Luka"));
        assert_eq!(candidates[1].registration_is_open, Some(false));
        assert_eq!(candidates[1].city, None);
    }

    #[test]
    fn missing_results_is_empty() {
        assert!(parse_response(r#"{"totalCount": 0}"#).unwrap().is_empty());
        assert!(parse_response(r#"{"results": null}"#).unwrap().is_empty());
        assert!(parse_response("[]").unwrap().is_empty());
    }

    #[test]
    fn error_object_is_an_unrecognized_envelope() {
        let envelope: SearchResponse =
            serde_json::from_str(r#"{"error": "rate limited"}"#).unwrap();
        assert!(envelope.is_unrecognized());
        assert!(parse_response(r#"{"error": "rate limited"}"#)
            .unwrap()
            .is_empty());

        let empty: SearchResponse = serde_json::from_str(r#"{"totalCount": 0}"#).unwrap();
        assert!(!empty.is_unrecognized());
    }

    #[test]
    fn accepts_bare_array() {
        let candidates = parse_response(r#"[{"id": "A", "city": "Tuzla"}]"#).unwrap();
        assert_eq!(candidates[0].id.as_deref(), Some("A"));
    }

    #[test]
    fn rejects_undecodable_body() {
        assert!(matches!(
            parse_response("<html>maintenance</html>"),
            Err(FetchError::Decode(_))
        ));
        assert!(matches!(
            parse_response(r#""just a string""#),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn file_source_reads_saved_listing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        fs::write(&path, SAMPLE_RESPONSE).unwrap();

        let source = JsonFileSource::new(&path);
        assert_eq!(source.fetch().unwrap().len(), 2);

        let missing = JsonFileSource::new(dir.path().join("absent.json"));
        assert!(matches!(missing.fetch(), Err(FetchError::Io { .. })));
    }
    async fn serve(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    // The blocking client owns its own runtime, so it must run off the test's.
    async fn fetch_from(
        server: &MockServer,
        timeout: Duration,
        save_to: Option<PathBuf>,
    ) -> Result<Vec<EventCandidate>, FetchError> {
        let url = format!("{}/events", server.uri());
        tokio::task::spawn_blocking(move || {
            let mut api = FibaApi::new(url, timeout)?;
            if let Some(path) = save_to {
                api = api.save_response_to(path);
            }
            api.fetch()
        })
        .await
        .expect("fetch task")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn api_rejects_error_status() {
        let server = serve(ResponseTemplate::new(503).set_body_string("maintenance")).await;

        let result = fetch_from(&server, Duration::from_secs(5), None).await;

        match result {
            Err(FetchError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn api_reports_timeout() {
        let server = serve(
            ResponseTemplate::new(200)
                .set_body_string(SAMPLE_RESPONSE)
                .set_delay(Duration::from_secs(3)),
        )
        .await;

        let result = fetch_from(&server, Duration::from_secs(1), None).await;

        assert!(
            matches!(result, Err(FetchError::Timeout(1))),
            "got {result:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn api_saves_raw_response() {
        let server = serve(ResponseTemplate::new(200).set_body_string(SAMPLE_RESPONSE)).await;
        let dir = TempDir::new().unwrap();
        let saved = dir.path().join("response.json");

        let candidates = fetch_from(&server, Duration::from_secs(5), Some(saved.clone()))
            .await
            .expect("fetch succeeds");

        assert_eq!(candidates.len(), 2);
        assert_eq!(fs::read_to_string(&saved).unwrap(), SAMPLE_RESPONSE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn api_ignores_failed_save() {
        let server = serve(ResponseTemplate::new(200).set_body_string(SAMPLE_RESPONSE)).await;
        let dir = TempDir::new().unwrap();
        let unwritable = dir.path().join("no-such-dir").join("response.json");

        let candidates = fetch_from(&server, Duration::from_secs(5), Some(unwritable.clone()))
            .await
            .expect("a failed save does not fail the fetch");

        assert_eq!(candidates.len(), 2);
        assert!(!unwritable.exists());
    }
}
