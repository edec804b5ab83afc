use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use herald_core::error::AppError;
use herald_core::models::{ArticleStats, CleanedContent};
use herald_core::traits::ContentCleaner;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SYSTEM_PROMPT: &str = r#"You clean scraped financial news articles. Remove navigation text, advertisements, share buttons, cookie notices, comment sections and unrelated links. Keep the article body verbatim, including prices, levels and quotes, split into paragraphs separated by blank lines. Do not summarise.

Respond with a single JSON object:
```json
{"title": "", "author": "", "date": "", "category": "", "cleaned_content": ""}
```
Use empty strings for metadata that is not present."#;
/// Longest input sent to the model, in characters.
const MAX_INPUT_CHARS: usize = 24_000;

/// Cut overlong input at the last sentence end in its final fifth, otherwise
/// mark the cut with an ellipsis.
fn truncate_input(raw: &str, limit: usize) -> Cow<'_, str> {
    let Some((cut, _)) = raw.char_indices().nth(limit) else {
        return Cow::Borrowed(raw);
    };
    tracing::warn!(
        chars = raw.chars().count(),
        limit,
        "Article too long for the LLM, truncating"
    );

    let head = &raw[..cut];
    match head.rfind('.') {
        Some(pos) if head[..pos].chars().count() > limit * 4 / 5 => Cow::Borrowed(&head[..=pos]),
        _ => Cow::Owned(format!("{head}...")),
    }
}

/// Rough token count of a prompt: words times 1.5.
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text.split_whitespace().count() as u64;
    words * 3 / 2
}

/// Token totals for one cleaner since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub requests: u64,
    /// Requests not sent because they would exceed the limit.
    pub refused: u64,
    pub limit: Option<u64>,
}

/// Per-process token counter with an optional ceiling, shared by clones.
#[derive(Debug, Clone, Default)]
pub struct TokenBudget {
    state: Arc<BudgetState>,
}

#[derive(Debug, Default)]
struct BudgetState {
    used: AtomicU64,
    requests: AtomicU64,
    refused: AtomicU64,
    limit: Option<u64>,
}

impl TokenBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn limited(limit: u64) -> Self {
        Self {
            state: Arc::new(BudgetState {
                limit: Some(limit),
                ..BudgetState::default()
            }),
        }
    }

    /// Whether a request of `estimated` tokens fits under the limit.
    pub fn can_spend(&self, estimated: u64) -> bool {
        match self.state.limit {
            Some(limit) => self.state.used.load(Ordering::Relaxed).saturating_add(estimated) <= limit,
            None => true,
        }
    }

    /// Record the tokens billed for one completed request.
    pub fn record(&self, tokens: u64) {
        self.state.used.fetch_add(tokens, Ordering::Relaxed);
        self.state.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn refuse(&self) {
        self.state.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            total_tokens: self.state.used.load(Ordering::Relaxed),
            requests: self.state.requests.load(Ordering::Relaxed),
            refused: self.state.refused.load(Ordering::Relaxed),
            limit: self.state.limit,
        }
    }
}

/// Normalise whitespace: trim lines, collapse runs of spaces and blank lines.
pub fn normalize_text(raw: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs.join("\n\n")
}

fn metadata(text: &str, source_name: &str, url: &str, cleaned_by: &str) -> serde_json::Value {
    json!({
        "source": source_name,
        "url": url,
        "cleaned_by": cleaned_by,
        "stats": ArticleStats::from_content(text),
    })
}

/// Deterministic cleaner: whitespace normalisation plus text statistics.
#[derive(Debug, Clone, Default)]
pub struct BasicCleaner;

impl BasicCleaner {
    pub fn new() -> Self {
        Self
    }

    fn clean_sync(&self, raw: &str, source_name: &str, url: &str) -> Result<CleanedContent, AppError> {
        let text = normalize_text(raw);
        if text.is_empty() {
            return Err(AppError::CleanerError(format!("no text left after cleaning {url}")));
        }
        let metadata = metadata(&text, source_name, url, "basic");
        Ok(CleanedContent { text, metadata })
    }
}

impl ContentCleaner for BasicCleaner {
    async fn clean(
        &self,
        raw: &str,
        source_name: &str,
        url: &str,
    ) -> Result<CleanedContent, AppError> {
        self.clean_sync(raw, source_name, url)
    }
}

/// LLM cleaner for any OpenAI-compatible chat completions API.
///
/// The model is asked for a JSON envelope holding the cleaned text plus the
/// title, author, date and category it found; those land under `extracted`
/// in the metadata. A reply that is not such an envelope is used as plain text.
///
/// When the API call fails, or the [token budget](Self::with_token_budget)
/// would be exceeded, the article is cleaned by [`BasicCleaner`] instead,
/// unless [`strict`](Self::strict) is set.
#[derive(Clone)]
pub struct OpenAiCleaner {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    system_prompt: String,
    fallback: Option<BasicCleaner>,
    budget: TokenBudget,
}

impl OpenAiCleaner {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_LLM_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        let rebuilt = Self::build(&self.api_key, &self.model, &self.base_url, timeout)?;
        Ok(Self {
            system_prompt: self.system_prompt,
            fallback: self.fallback,
            budget: self.budget,
            ..rebuilt
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Stop calling the API once `limit` tokens have been used by this process.
    pub fn with_token_budget(mut self, limit: u64) -> Self {
        self.budget = TokenBudget::limited(limit);
        self
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.budget.usage()
    }

    /// Surface API failures instead of falling back to basic cleaning.
    pub fn strict(mut self) -> Self {
        self.fallback = None;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            fallback: Some(BasicCleaner::new()),
            budget: TokenBudget::unlimited(),
        })
    }

    async fn complete(&self, raw: &str, source_name: &str) -> Result<Completion, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let input = truncate_input(raw, MAX_INPUT_CHARS);

        let estimated = estimate_tokens(&input);
        if !self.budget.can_spend(estimated) {
            self.budget.refuse();
            let usage = self.budget.usage();
            return Err(AppError::CleanerError(format!(
                "LLM token budget exhausted: {} of {} used, request needs ~{estimated}",
                usage.total_tokens,
                usage.limit.unwrap_or_default()
            )));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.system_prompt.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: format!("Source: {source_name}\n\n{input}"),
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status_code, &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse LLM response: {e}")))?;

        let completion = parse_completion(chat_response)?;
        let billed = completion.total_tokens.unwrap_or(estimated);
        self.budget.record(billed);
        tracing::debug!(source = source_name, tokens = billed, "LLM usage");
        Ok(completion)
    }
}

fn api_error(status_code: u16, body: &str) -> AppError {
    if status_code == 429 {
        return AppError::RateLimitExceeded;
    }
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

    AppError::LlmError {
        message,
        status_code,
        retryable: status_code >= 500,
    }
}

struct Completion {
    text: String,
    total_tokens: Option<u64>,
}

fn parse_completion(response: ChatResponse) -> Result<Completion, AppError> {
    let total_tokens = response.usage.map(|u| u.total_tokens);
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::LlmError {
            message: "Empty response from LLM".into(),
            status_code: 200,
            retryable: false,
        })?;
    Ok(Completion { text, total_tokens })
}

/// Structured reply requested by the default prompt.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    category: String,
    cleaned_content: String,
}

impl Envelope {
    fn extracted(&self) -> serde_json::Value {
        let fields = [
            ("title", &self.title),
            ("author", &self.author),
            ("date", &self.date),
            ("category", &self.category),
        ];
        let map: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(key, value)| (key, value.trim()))
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Read an envelope from a ```json fenced block, or from the whole reply.
fn parse_envelope(completion: &str) -> Option<Envelope> {
    let body = fenced_json(completion).unwrap_or(completion).trim();
    let envelope: Envelope = serde_json::from_str(body).ok()?;
    (!envelope.cleaned_content.trim().is_empty()).then_some(envelope)
}

fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl ContentCleaner for OpenAiCleaner {
    async fn clean(
        &self,
        raw: &str,
        source_name: &str,
        url: &str,
    ) -> Result<CleanedContent, AppError> {
        match self.complete(raw, source_name).await {
            Ok(completion) => {
                let envelope = parse_envelope(&completion.text);
                if envelope.is_none() {
                    tracing::debug!(url, "LLM reply is not a JSON envelope, using it as text");
                }
                let text = match &envelope {
                    Some(envelope) => normalize_text(&envelope.cleaned_content),
                    None => normalize_text(&completion.text),
                };
                let mut metadata = metadata(&text, source_name, url, "llm");
                metadata["model"] = json!(self.model);
                if let Some(envelope) = &envelope {
                    metadata["extracted"] = envelope.extracted();
                }
                if let Some(tokens) = completion.total_tokens {
                    metadata["tokens"] = json!(tokens);
                }
                Ok(CleanedContent { text, metadata })
            }
            Err(e) => match &self.fallback {
                Some(basic) => {
                    tracing::warn!(url, error = %e, "LLM cleaning failed, using basic cleaner");
                    basic.clean_sync(raw, source_name, url)
                }
                None => Err(e),
            },
        }
    }
}

/// Cleaner chosen at startup from configuration.
#[derive(Clone)]
pub enum ConfiguredCleaner {
    Basic(BasicCleaner),
    Llm(OpenAiCleaner),
}

impl ConfiguredCleaner {
    pub fn describe(&self) -> String {
        match self {
            ConfiguredCleaner::Basic(_) => "basic".to_string(),
            ConfiguredCleaner::Llm(c) => format!("llm ({})", c.model()),
        }
    }

    /// Token totals, when an LLM is in use.
    pub fn token_usage(&self) -> Option<TokenUsage> {
        match self {
            ConfiguredCleaner::Basic(_) => None,
            ConfiguredCleaner::Llm(c) => Some(c.token_usage()),
        }
    }
}

impl ContentCleaner for ConfiguredCleaner {
    async fn clean(
        &self,
        raw: &str,
        source_name: &str,
        url: &str,
    ) -> Result<CleanedContent, AppError> {
        match self {
            ConfiguredCleaner::Basic(c) => c.clean(raw, source_name, url).await,
            ConfiguredCleaner::Llm(c) => c.clean(raw, source_name, url).await,
        }
    }
}
