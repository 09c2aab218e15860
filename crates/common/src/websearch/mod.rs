//! External web search
//!
//! A web search returns one concatenated text blob per query. An empty
//! blob means the search produced nothing usable.

use crate::config::WebSearchConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search the web and return the concatenated result text
    async fn search(&self, query: &str) -> Result<String>;
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    abstract_text: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Related topics are either leaf entries or named groups of entries
#[derive(Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Entry {
        #[serde(rename = "Text")]
        text: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl RelatedTopic {
    fn collect_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            RelatedTopic::Entry { text } => out.push(text),
            RelatedTopic::Group { topics } => {
                for topic in topics {
                    topic.collect_text(out);
                }
            }
        }
    }
}

/// DuckDuckGo Instant Answer client
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
    max_snippets: usize,
}

impl DuckDuckGoSearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("docresearch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            max_snippets: config.max_snippets,
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<String> {
        let response = self.client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| AppError::WebSearch {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::WebSearch {
                message: format!("Search API returned {}", response.status()),
            });
        }

        // The API answers with a JSON body but a javascript content type
        let body = response.text().await.map_err(|e| AppError::WebSearch {
            message: format!("Failed to read response: {}", e),
        })?;
        let answer: InstantAnswer = serde_json::from_str(&body).map_err(|e| AppError::WebSearch {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(concatenate(&answer, self.max_snippets))
    }
}

fn concatenate(answer: &InstantAnswer, max_snippets: usize) -> String {
    let mut snippets: Vec<&str> = Vec::new();
    for text in [answer.answer.as_str(), answer.abstract_text.as_str()] {
        if !text.trim().is_empty() {
            snippets.push(text);
        }
    }
    for topic in &answer.related_topics {
        topic.collect_text(&mut snippets);
    }

    snippets
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(max_snippets)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Web search that never finds anything
pub struct DisabledWebSearch;

#[async_trait]
impl WebSearch for DisabledWebSearch {
    async fn search(&self, _query: &str) -> Result<String> {
        Ok(String::new())
    }
}

/// Create the web search client for the configured provider
pub fn create_web_search(config: &WebSearchConfig) -> Result<Arc<dyn WebSearch>> {
    match config.provider.as_str() {
        "duckduckgo" => Ok(Arc::new(DuckDuckGoSearch::new(config)?)),
        "disabled" | "none" => {
            tracing::warn!("Web search disabled; web stages will yield no documents");
            Ok(Arc::new(DisabledWebSearch))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown web search provider: {}", other),
        }),
    }
}
