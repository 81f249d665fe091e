//! Answer composition over retrieval hits.
//!
//! [`ChatClient`] talks to an OpenAI-compatible `POST <base>/chat/completions`
//! endpoint. [`answer_question`] packs the top hits into a bounded context
//! block and asks the model to rank candidates; [`summarize_resume`] produces
//! a short summary of one resume and degrades to an extractive summary when
//! the chat service is unavailable.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use resume_search_core::embedding::tokenize;
use resume_search_core::models::Hit;

use crate::config::Config;

const SYSTEM_PROMPT: &str = "You are an assistant that answers hiring queries using only the \
provided resume snippets. Summarize and rank the most relevant candidates. Be concise and \
factual. If information is missing, say so.";

/// Sentences kept by [`extractive_summary`].
pub const EXTRACTIVE_SENTENCES: usize = 3;

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("chat configuration error: {0}")]
    Config(String),

    #[error("chat request failed: {0}")]
    Transport(String),

    #[error("chat response has no choices: {snippet}")]
    ResponseFormat { snippet: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Anything that can turn a message list into one completion.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AnswerError>;
}

pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    /// Build from the `[chat]` section, borrowing the base URL and API key
    /// from `[embedding]` when the chat section leaves them unset.
    pub fn from_config(config: &Config) -> Result<Self, AnswerError> {
        let pick = |own: &Option<String>, fallback: &Option<String>| {
            own.as_deref()
                .or(fallback.as_deref())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let base_url = pick(&config.chat.base_url, &config.embedding.base_url)
            .ok_or_else(|| AnswerError::Config("chat base URL is not set".to_string()))?;
        let api_key = pick(&config.chat.api_key, &config.embedding.api_key)
            .ok_or_else(|| AnswerError::Config("chat API key is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding.timeout_secs))
            .danger_accept_invalid_certs(!config.embedding.verify_tls)
            .build()
            .map_err(|e| AnswerError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.chat.model.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatCompletion for ChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AnswerError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        debug!(endpoint = %self.endpoint, messages = messages.len(), "chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnswerError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AnswerError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(AnswerError::Transport(format!("HTTP {}: {}", status, snip(&text))));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|_| AnswerError::ResponseFormat { snippet: snip(&text) })?;
        parse_completion(&json).ok_or_else(|| AnswerError::ResponseFormat { snippet: snip(&text) })
    }
}

/// `choices[0].message.content`, if present.
pub fn parse_completion(json: &Value) -> Option<String> {
    json.get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

fn snip(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Render hits as `[ID: … | Category: …]` blocks, stopping before the block
/// that would push the total past `max_chars`.
pub fn build_context_snippets(hits: &[Hit], max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for hit in hits {
        let block = format!(
            "[ID: {} | Category: {}]\n{}\n---\n",
            hit.id,
            hit.category(),
            hit.document
        );
        let block_chars = block.chars().count();
        if used + block_chars > max_chars {
            break;
        }
        used += block_chars;
        out.push_str(&block);
    }
    out
}

/// Ask the chat model to answer `question` from `hits`.
pub async fn answer_question(
    chat: &dyn ChatCompletion,
    config: &Config,
    question: &str,
    hits: &[Hit],
) -> Result<String, AnswerError> {
    let context = build_context_snippets(hits, config.chat.context_chars);
    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Query: {}\n\nUse only the following resume snippets:\n\n{}\n\n\
             Return:\n- A short answer to the query\n\
             - A bullet list of top 5 candidate IDs with 1-line reasons\n",
            question, context
        )),
    ];
    chat.complete(&messages, config.chat.temperature, config.chat.max_tokens)
        .await
}

/// Summarize one resume with the chat model, or extractively when the model
/// cannot be reached or answers in an unexpected shape.
pub async fn summarize_resume(
    chat: Option<&dyn ChatCompletion>,
    config: &Config,
    text: &str,
) -> String {
    let Some(chat) = chat else {
        return extractive_summary(text, EXTRACTIVE_SENTENCES);
    };

    let prompt = format!(
        "Summarize this candidate's resume in 5 sentences, focusing on their experience, \
         main skills, and professional highlights. Be concise and informative.\n\nRESUME:\n{}\n",
        text
    );
    match chat
        .complete(
            &[ChatMessage::user(prompt)],
            config.chat.summary_temperature,
            config.chat.summary_max_tokens,
        )
        .await
    {
        Ok(summary) if !summary.trim().is_empty() => summary,
        Ok(_) => extractive_summary(text, EXTRACTIVE_SENTENCES),
        Err(e) => {
            warn!(error = %e, "chat summary failed, using extractive summary");
            extractive_summary(text, EXTRACTIVE_SENTENCES)
        }
    }
}

/// The `n` highest-weighted sentences of `text`, in their original order.
///
/// A sentence weighs the sum of its tokens' corpus frequency times their
/// inverse sentence frequency, normalised by the square root of its length,
/// so sentences built from the resume's recurring terms rank first.
pub fn extractive_summary(text: &str, n: usize) -> String {
    let text = crate::html::collapse_whitespace(text);
    let sentences = split_sentences(&text);
    if sentences.len() <= n {
        return sentences.join(" ");
    }

    let tokens: Vec<Vec<String>> = sentences.iter().map(|s| tokenize(s)).collect();
    let mut term_freq: HashMap<&str, usize> = HashMap::new();
    let mut sentence_freq: HashMap<&str, usize> = HashMap::new();
    for sentence in &tokens {
        let mut seen = HashSet::new();
        for token in sentence {
            *term_freq.entry(token.as_str()).or_default() += 1;
            if seen.insert(token.as_str()) {
                *sentence_freq.entry(token.as_str()).or_default() += 1;
            }
        }
    }

    let total = sentences.len() as f32;
    let mut scored: Vec<(usize, f32)> = tokens
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let weight: f32 = sentence
                .iter()
                .map(|t| {
                    let tf = term_freq[t.as_str()] as f32;
                    let df = sentence_freq[t.as_str()] as f32;
                    tf * (1.0 + (total / df).ln())
                })
                .sum();
            (i, weight / (sentence.len().max(1) as f32).sqrt())
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut keep: Vec<usize> = scored.into_iter().take(n).map(|(i, _)| i).collect();
    keep.sort_unstable();
    keep.iter()
        .map(|&i| sentences[i])
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split at `.`, `!` or `?` followed by a space or the end of the text.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    for (i, &(pos, ch)) in chars.iter().enumerate() {
        let at_boundary = matches!(ch, '.' | '!' | '?')
            && chars.get(i + 1).map(|&(_, next)| next == ' ').unwrap_or(true);
        if at_boundary {
            let end = pos + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use resume_search_core::models::Metadata;

    fn hit(id: &str, category: &str, document: &str) -> Hit {
        let mut metadata = Metadata::new();
        metadata.insert("category".to_string(), category.to_string());
        Hit {
            id: id.to_string(),
            document: document.to_string(),
            metadata,
            distance: 0.1,
        }
    }

    #[test]
    fn snippets_respect_budget() {
        let hits = vec![hit("1", "ENG", "Rust dev"), hit("2", "HR", "Recruiter")];
        let all = build_context_snippets(&hits, 8000);
        assert_eq!(
            all,
            "[ID: 1 | Category: ENG]\nRust dev\n---\n[ID: 2 | Category: HR]\nRecruiter\n---\n"
        );

        let first_len = "[ID: 1 | Category: ENG]\nRust dev\n---\n".len();
        let one = build_context_snippets(&hits, first_len + 5);
        assert_eq!(one, "[ID: 1 | Category: ENG]\nRust dev\n---\n");
        assert_eq!(build_context_snippets(&hits, 10), "");
    }

    #[test]
    fn snippet_budget_counts_characters() {
        let hits = vec![hit("1", "ÉQUIPE", "Développeuse ĉefa, Zürich"), hit("2", "HR", "x")];
        let first = "[ID: 1 | Category: ÉQUIPE]\nDéveloppeuse ĉefa, Zürich\n---\n";
        assert!(first.len() > first.chars().count());
        assert_eq!(build_context_snippets(&hits, first.chars().count()), first);
    }

    #[test]
    fn extractive_keeps_short_text_whole() {
        let text = "Led a team. Built   pipelines! Shipped v2?";
        assert_eq!(
            extractive_summary(text, 3),
            "Led a team. Built pipelines! Shipped v2?"
        );
        assert_eq!(extractive_summary("No punctuation here", 3), "No punctuation here");
        assert_eq!(extractive_summary("Version 1.5 released. Done.", 1), "Version 1.5 released.");
        assert_eq!(extractive_summary("", 3), "");
    }

    #[test]
    fn extractive_ranks_by_recurring_terms() {
        let text = "Hello there. Rust engineer with Rust and Rust tooling experience. \
                    Likes hiking. Rust mentor for Rust teams.";
        assert_eq!(
            extractive_summary(text, 2),
            "Rust engineer with Rust and Rust tooling experience. Rust mentor for Rust teams."
        );
    }

    #[test]
    fn parses_first_choice() {
        let ok = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(parse_completion(&ok).as_deref(), Some("hello"));
        assert_eq!(parse_completion(&json!({"choices": []})), None);
        assert_eq!(parse_completion(&json!({})), None);
    }

    struct Mock {
        status: StatusCode,
        reply: Value,
        requests: AtomicUsize,
        bodies: Mutex<Vec<Value>>,
    }

    async fn handle(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Response {
        mock.requests.fetch_add(1, Ordering::SeqCst);
        mock.bodies.lock().unwrap().push(body);
        (mock.status, Json(mock.reply.clone())).into_response()
    }

    async fn spawn(status: StatusCode, reply: Value) -> (Config, Arc<Mock>) {
        let mock = Arc::new(Mock {
            status,
            reply,
            requests: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/chat/completions", post(handle))
            .with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = Config::default();
        config.embedding.base_url = Some(format!("http://{}", addr));
        config.embedding.api_key = Some("secret".to_string());
        config.chat.model = "chat-small".to_string();
        (config, mock)
    }

    #[tokio::test]
    async fn answer_posts_context_and_settings() {
        let (config, mock) = spawn(
            StatusCode::OK,
            json!({"choices": [{"message": {"content": "Candidate 7 fits."}}]}),
        )
        .await;
        let client = ChatClient::from_config(&config).unwrap();
        let answer = answer_question(&client, &config, "rust?", &[hit("7", "ENG", "Rust")])
            .await
            .unwrap();
        assert_eq!(answer, "Candidate 7 fits.");

        let bodies = mock.bodies.lock().unwrap();
        let body = &bodies[0];
        assert_eq!(body["model"], "chat-small");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["messages"][0]["role"], "system");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Query: rust?"));
        assert!(user.contains("[ID: 7 | Category: ENG]"));
    }

    #[tokio::test]
    async fn empty_choices_is_response_format() {
        let (config, _mock) = spawn(StatusCode::OK, json!({"choices": []})).await;
        let client = ChatClient::from_config(&config).unwrap();
        let err = client
            .complete(&[ChatMessage::user("hi")], 0.2, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AnswerError::ResponseFormat { .. }));
    }

    #[tokio::test]
    async fn summary_falls_back_when_service_fails() {
        let (config, mock) = spawn(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "x"})).await;
        let client = ChatClient::from_config(&config).unwrap();
        let text = "One. Two. Three. Four.";
        let summary = summarize_resume(Some(&client as &dyn ChatCompletion), &config, text).await;
        assert_eq!(summary, "One. Two. Three.");
        assert_eq!(mock.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn summary_uses_model_reply() {
        let (config, mock) = spawn(
            StatusCode::OK,
            json!({"choices": [{"message": {"content": "Seasoned engineer."}}]}),
        )
        .await;
        let client = ChatClient::from_config(&config).unwrap();
        let summary = summarize_resume(Some(&client as &dyn ChatCompletion), &config, "Long resume.").await;
        assert_eq!(summary, "Seasoned engineer.");
        let bodies = mock.bodies.lock().unwrap();
        assert_eq!(bodies[0]["max_tokens"], 200);
    }

    #[test]
    fn chat_settings_fall_back_to_embedding() {
        let mut config = Config::default();
        assert!(matches!(
            ChatClient::from_config(&config),
            Err(AnswerError::Config(_))
        ));
        config.embedding.base_url = Some("https://llm.example/v1/".to_string());
        config.embedding.api_key = Some("k".to_string());
        let client = ChatClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), "https://llm.example/v1/chat/completions");

        config.chat.base_url = Some("https://chat.example".to_string());
        let client = ChatClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), "https://chat.example/chat/completions");
    }
}
