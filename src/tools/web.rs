//! Web search via Google Custom Search, with a synthetic fallback.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{required_str, Tool, ToolError};
use crate::config::SearchConfig;
use crate::events::{AgentEvent, EventEmitter};

const RESULT_COUNT: u32 = 5;

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Search the web. Never fails for provider reasons: missing credentials or
/// a provider error produce labeled placeholder results instead.
pub struct WebSearch {
    http: reqwest::Client,
    config: SearchConfig,
    events: EventEmitter,
}

impl WebSearch {
    pub fn new(config: SearchConfig, events: EventEmitter) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, config, events }
    }

    async fn google(&self, key: &str, cx: &str, query: &str) -> Result<Value, String> {
        let url = format!(
            "{}?key={}&cx={}&q={}&num={}",
            self.config.endpoint,
            urlencoding::encode(key),
            urlencoding::encode(cx),
            urlencoding::encode(query),
            RESULT_COUNT
        );

        let response = self.http.get(&url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "Google API Error: {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            ));
        }

        let data: Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(data)
    }

    fn synthetic(&self, query: &str) -> Value {
        let results = synthetic_results(query);
        self.events.emit(AgentEvent::SearchResults {
            results: results.clone(),
            synthetic: true,
        });
        json!({
            "query": query,
            "results": results,
            "synthetic": true,
            "note": "Synthetic placeholder results - configure Google API credentials for real results"
        })
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "google_search"
    }

    fn description(&self) -> &str {
        "Search Google for current information. Returns search results with titles, links, and snippets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = required_str(&args, self.name(), "query")?;

        self.events.system(format!("🔍 Searching Google for: \"{}\"", query));

        let Some((key, cx)) = self.config.credentials() else {
            tracing::warn!("Search credentials not configured, returning synthetic results");
            self.events
                .system("⚠️ Google Search API not configured. Using synthetic results.");
            return Ok(self.synthetic(query));
        };

        match self.google(key, cx, query).await {
            Ok(data) => {
                let payload = search_payload(query, &data);
                match hits_of(&payload) {
                    Some(results) if !results.is_empty() => self.events.emit(AgentEvent::SearchResults {
                        results,
                        synthetic: false,
                    }),
                    _ => self.events.system("📭 No search results found."),
                }
                Ok(payload)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Google search failed, returning synthetic results");
                self.events.system(format!("❌ Google Search failed: {}", e));
                Ok(self.synthetic(query))
            }
        }
    }
}

/// Shape a Custom Search response into the tool payload.
fn search_payload(query: &str, data: &Value) -> Value {
    let items = data["items"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    if items.is_empty() {
        return json!({
            "query": query,
            "results": [],
            "note": "No results found for this query"
        });
    }

    let results: Vec<SearchHit> = items
        .iter()
        .map(|item| SearchHit {
            title: item["title"].as_str().unwrap_or_default().to_string(),
            link: item["link"].as_str().unwrap_or_default().to_string(),
            snippet: item["snippet"]
                .as_str()
                .filter(|s| !s.is_empty())
                .unwrap_or("No description available")
                .to_string(),
        })
        .collect();

    let info = &data["searchInformation"];
    json!({
        "query": query,
        "results": results,
        "total_results": info.get("totalResults").cloned().unwrap_or(json!(0)),
        "search_time": info.get("searchTime").cloned().unwrap_or(json!(0)),
    })
}

fn hits_of(payload: &Value) -> Option<Vec<SearchHit>> {
    serde_json::from_value(payload["results"].clone()).ok()
}

fn synthetic_results(query: &str) -> Vec<SearchHit> {
    vec![
        SearchHit {
            title: format!("Latest information about \"{}\"", query),
            link: "https://example.com/result1".to_string(),
            snippet: format!(
                "This is a synthetic search result for \"{}\". Configure Google API credentials for real search results.",
                query
            ),
        },
        SearchHit {
            title: format!("{} - Complete Guide", query),
            link: "https://example.com/result2".to_string(),
            snippet: format!(
                "Synthetic result showing comprehensive information about {}. Real Google Search API integration available.",
                query
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn missing_credentials_fall_back_to_synthetic_results() {
        let (events, mut rx) = EventEmitter::channel();
        let search = WebSearch::new(SearchConfig::default(), events);

        let payload = search.execute(json!({"query": "x"})).await.unwrap();
        assert_eq!(payload["query"], "x");
        assert_eq!(payload["synthetic"], true);
        assert!(payload["note"].as_str().unwrap().contains("Synthetic"));
        assert_eq!(payload["results"].as_array().unwrap().len(), 2);

        let mut saw_results = false;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::SearchResults { synthetic, .. } = event {
                assert!(synthetic);
                saw_results = true;
            }
        }
        assert!(saw_results);
    }

    fn credentials(endpoint: String) -> SearchConfig {
        SearchConfig {
            google_api_key: Some("key".to_string()),
            google_cx: Some("cx".to_string()),
            endpoint,
        }
    }

    #[tokio::test]
    async fn provider_errors_fall_back_to_synthetic_results() {
        let base = testing::serve_once("500 Internal Server Error", r#"{"error":"backend down"}"#).await;
        let (events, mut rx) = EventEmitter::channel();
        let search = WebSearch::new(credentials(format!("{}/customsearch/v1", base)), events);

        let payload = search.execute(json!({"query": "rust"})).await.unwrap();
        assert_eq!(payload["synthetic"], true);
        assert_eq!(payload["results"].as_array().unwrap().len(), 2);

        let failure = std::iter::from_fn(|| rx.try_recv().ok()).find_map(|e| match e {
            AgentEvent::Message { content, .. } if content.starts_with("❌ Google Search failed") => Some(content),
            _ => None,
        });
        assert!(failure.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn unreachable_or_garbled_provider_falls_back() {
        let search = WebSearch::new(credentials(testing::closed_endpoint().await), EventEmitter::silent());
        let payload = search.execute(json!({"query": "rust"})).await.unwrap();
        assert_eq!(payload["synthetic"], true);

        let base = testing::serve_once("200 OK", "not json").await;
        let search = WebSearch::new(credentials(base), EventEmitter::silent());
        let payload = search.execute(json!({"query": "rust"})).await.unwrap();
        assert_eq!(payload["synthetic"], true);
    }

    #[tokio::test]
    async fn provider_results_are_returned() {
        let body = json!({
            "items": [{"title": "Rust", "link": "https://rust-lang.org", "snippet": "A language"}],
            "searchInformation": {"totalResults": "1", "searchTime": 0.1}
        });
        let base = testing::serve_once("200 OK", &body.to_string()).await;
        let search = WebSearch::new(credentials(base), EventEmitter::silent());

        let payload = search.execute(json!({"query": "rust"})).await.unwrap();
        assert!(payload.get("synthetic").is_none());
        assert_eq!(payload["results"][0]["title"], "Rust");
        assert_eq!(payload["total_results"], "1");
    }

    #[tokio::test]
    async fn missing_query_is_invalid() {
        let search = WebSearch::new(SearchConfig::default(), EventEmitter::silent());
        let err = search.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn provider_response_is_shaped() {
        let data = json!({
            "items": [
                {"title": "Rust", "link": "https://rust-lang.org", "snippet": "A language"},
                {"title": "Crates", "link": "https://crates.io"}
            ],
            "searchInformation": {"totalResults": "1200", "searchTime": 0.21}
        });
        let payload = search_payload("rust", &data);
        assert_eq!(payload["results"][1]["snippet"], "No description available");
        assert_eq!(payload["total_results"], "1200");
        assert_eq!(payload["search_time"], 0.21);
        assert_eq!(hits_of(&payload).unwrap().len(), 2);
    }

    #[test]
    fn empty_response_notes_no_results() {
        let payload = search_payload("nothing", &json!({"searchInformation": {}}));
        assert_eq!(payload["results"], json!([]));
        assert_eq!(payload["note"], "No results found for this query");
        assert!(payload.get("total_results").is_none());
    }
}
