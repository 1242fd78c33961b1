// HTTP annotator speaking the Perspective `comments:analyze` shape.
// Every worker gets its own reqwest client; nothing is shared between shards.

use super::{Annotator, AnnotatorError, AnnotatorFactory, HandleError};
use crate::domain::{CategorySchema, ScoreSet};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("bulk-annotator/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpAnnotatorConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub categories: CategorySchema,
    pub languages: Vec<String>,
    pub request_timeout: Duration,
    pub do_not_store: bool,
}

#[derive(Debug, Clone)]
pub struct HttpAnnotatorFactory {
    config: Arc<HttpAnnotatorConfig>,
    request_url: Url,
}

impl HttpAnnotatorFactory {
    pub fn new(config: HttpAnnotatorConfig) -> Self {
        let mut request_url = config.endpoint.clone();
        if let Some(key) = &config.api_key {
            request_url.query_pairs_mut().append_pair("key", key);
        }

        Self {
            config: Arc::new(config),
            request_url,
        }
    }
}

impl AnnotatorFactory for HttpAnnotatorFactory {
    type Handle = HttpAnnotator;

    fn create(&self, shard: usize) -> Result<HttpAnnotator, HandleError> {
        let client = ClientBuilder::new()
            .timeout(self.config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HandleError {
                shard,
                reason: e.to_string(),
            })?;

        Ok(HttpAnnotator {
            client,
            request_url: self.request_url.clone(),
            config: self.config.clone(),
        })
    }
}

#[derive(Debug)]
pub struct HttpAnnotator {
    client: Client,
    request_url: Url,
    config: Arc<HttpAnnotatorConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    comment: Comment<'a>,
    requested_attributes: BTreeMap<&'a str, Empty>,
    languages: &'a [String],
    do_not_store: bool,
}

#[derive(Serialize)]
struct Comment<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    attribute_scores: HashMap<String, AttributeScore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: SummaryScore,
}

#[derive(Deserialize)]
struct SummaryScore {
    value: f64,
}

impl HttpAnnotator {
    fn build_request<'a>(&'a self, text: &'a str) -> AnalyzeRequest<'a> {
        AnalyzeRequest {
            comment: Comment { text },
            requested_attributes: self
                .config
                .categories
                .names()
                .iter()
                .map(|name| (name.as_str(), Empty {}))
                .collect(),
            languages: &self.config.languages,
            do_not_store: self.config.do_not_store,
        }
    }

    fn extract_scores(&self, response: AnalyzeResponse) -> Result<ScoreSet, AnnotatorError> {
        let mut scores = ScoreSet::new();
        for name in self.config.categories.names() {
            let score = response.attribute_scores.get(name).ok_or_else(|| {
                AnnotatorError::Permanent(format!("response is missing category {name}"))
            })?;
            scores.insert(name.clone(), score.summary_score.value);
        }
        Ok(scores)
    }
}

fn classify_status(status: StatusCode, body: &str) -> AnnotatorError {
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), snippet.trim());

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        AnnotatorError::Transient(message)
    } else {
        AnnotatorError::Permanent(message)
    }
}

fn classify_transport(error: &reqwest::Error) -> AnnotatorError {
    if error.is_builder() {
        AnnotatorError::Permanent(format!("invalid request: {error}"))
    } else {
        AnnotatorError::Transient(format!("request failed: {error}"))
    }
}

impl Annotator for HttpAnnotator {
    async fn analyze(&mut self, text: &str) -> Result<ScoreSet, AnnotatorError> {
        let body = self.build_request(text);

        let response = self
            .client
            .post(self.request_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AnnotatorError::Transient(format!("undecodable response: {e}")))?;

        self.extract_scores(parsed)
    }
}
