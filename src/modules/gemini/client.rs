//! Gemini `generateContent` client with retries.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_millis(1500) }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug)]
pub enum GeminiError {
    /// Retries exhausted on 429/5xx/timeouts.
    Overloaded(String),
    Http(String),
    Api { status: u16, message: String },
    Blocked(String),
    Parse(String),
    Empty,
}

impl fmt::Display for GeminiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeminiError::Overloaded(e) => write!(f, "service overloaded: {e}"),
            GeminiError::Http(e) => write!(f, "HTTP error: {e}"),
            GeminiError::Api { status, message } => write!(f, "API error {status}: {message}"),
            GeminiError::Blocked(r) => write!(f, "prompt blocked: {r}"),
            GeminiError::Parse(e) => write!(f, "Parse error: {e}"),
            GeminiError::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for GeminiError {}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

enum Attempt {
    Done(Result<String, GeminiError>),
    Retry(String),
}

impl GeminiClient {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), retry }
    }

    /// Generate text, retrying transient failures with exponential backoff.
    pub async fn generate(&self, api_key: &str, generation: &Generation, prompt: &str) -> Result<String, GeminiError> {
        let request = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: prompt.to_string() }] }],
            generation_config: GenerationConfig {
                temperature: generation.temperature,
                top_k: 1,
                top_p: 1.0,
                max_output_tokens: generation.max_output_tokens,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting { category, threshold: "BLOCK_MEDIUM_AND_ABOVE" })
                .collect(),
        };
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url,
            generation.model,
            urlencoding::encode(api_key)
        );

        let mut last_error = String::new();
        for attempt in 1..=self.retry.attempts.max(1) {
            match self.attempt(&url, &request).await {
                Attempt::Done(result) => return result,
                Attempt::Retry(reason) => {
                    warn!("Gemini attempt {attempt}/{} failed: {reason}", self.retry.attempts);
                    last_error = reason;
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }
        Err(GeminiError::Overloaded(last_error))
    }

    async fn attempt(&self, url: &str, request: &GenerateRequest) -> Attempt {
        let response = match self.client.post(url).json(request).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => return Attempt::Retry(e.to_string()),
            Err(e) => return Attempt::Done(Err(GeminiError::Http(e.to_string()))),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) if e.is_timeout() => return Attempt::Retry(e.to_string()),
            Err(e) => return Attempt::Done(Err(GeminiError::Http(e.to_string()))),
        };
        debug!("Gemini response status: {status}");

        if matches!(status.as_u16(), 429 | 500 | 503) {
            return Attempt::Retry(format!("status {status}"));
        }
        Attempt::Done(parse_body(status.as_u16(), &body))
    }
}

fn parse_body(status: u16, body: &str) -> Result<String, GeminiError> {
    let parsed: GenerateResponse = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) if status == 200 => return Err(GeminiError::Parse(e.to_string())),
        Err(_) => return Err(GeminiError::Api { status, message: body.chars().take(200).collect() }),
    };

    if let Some(error) = parsed.error {
        return Err(GeminiError::Api { status, message: error.message });
    }
    if status != 200 {
        return Err(GeminiError::Api { status, message: body.chars().take(200).collect() });
    }
    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GeminiError::Blocked(reason));
    }

    let text: String = parsed
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GeminiError::Empty);
    }
    info!("🤖 Gemini answered ({} chars)", text.len());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_BODY: &str = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"there"}]}}]}"#;

    fn generation() -> Generation {
        Generation { model: "gemini-1.5-flash".into(), temperature: 0.9, max_output_tokens: 2048 }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { attempts: 3, base_delay: Duration::from_millis(1) }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(1500));
        assert_eq!(policy.delay(2), Duration::from_millis(3000));
        assert_eq!(policy.delay(3), Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn test_generate_joins_parts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "k".into()))
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"generationConfig":{"maxOutputTokens":2048,"topK":1}}"#.into(),
            ))
            .with_status(200)
            .with_body(OK_BODY)
            .create_async()
            .await;

        let client = GeminiClient::new(&server.url(), fast_retry());
        let text = client.generate("k", &generation(), "hi").await.unwrap();
        assert_eq!(text, "Hello there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_on_503_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = GeminiClient::new(&server.url(), fast_retry());
        let err = client.generate("k", &generation(), "hi").await;
        assert!(matches!(err, Err(GeminiError::Overloaded(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_retry_on_400() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"message":"API key not valid"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = GeminiClient::new(&server.url(), fast_retry());
        match client.generate("k", &generation(), "hi").await {
            Err(GeminiError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert!(message.contains("not valid"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[test]
    fn test_parse_blocked_and_empty() {
        let blocked = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(parse_body(200, blocked), Err(GeminiError::Blocked(r)) if r == "SAFETY"));
        assert!(matches!(parse_body(200, r#"{"candidates":[]}"#), Err(GeminiError::Empty)));
        assert!(matches!(parse_body(200, "nope"), Err(GeminiError::Parse(_))));
    }
}
