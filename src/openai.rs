// MIT License
// Copyright (c) 2025 Copydesk Authors

use crate::Prompts;

pub const CHAT_MODEL_BIG: &str = "gpt-4o";
pub const CHAT_MODEL_SMALL: &str = "gpt-4o-mini";

const EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE: &str = "https://api.openai.com";

fn api_base() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE.to_string())
}

fn api_key() -> anyhow::Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("Set variable OPENAI_API_KEY to your key"))
}

#[derive(Debug, serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'static str,
    input: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct EmbedResponse {
    data: Vec<Embedding>,
}

#[derive(Debug, serde::Deserialize)]
struct Embedding {
    embedding: Vec<f64>,
}

/// Use model text-embedding-3-small to calculate an embedding for this string
pub fn embed(body: &str) -> anyhow::Result<Vec<f64>> {
    embed_at(&api_base(), &api_key()?, body)
}

pub(crate) fn embed_at(base: &str, api_key: &str, body: &str) -> anyhow::Result<Vec<f64>> {
    let req = EmbedRequest {
        model: EMBED_MODEL,
        input: body,
    };
    let client = reqwest::blocking::Client::new();
    let res = client
        .post(format!("{base}/v1/embeddings"))
        .bearer_auth(api_key)
        .json(&req)
        .send()?;
    if res.status() != http::StatusCode::OK {
        return Err(anyhow::anyhow!("HTTP error {}", res.status()));
    }
    let mut out: EmbedResponse = res.json()?;
    if out.data.is_empty() {
        return Err(anyhow::anyhow!("No embedding in response"));
    }
    Ok(out.data.remove(0).embedding)
}

#[derive(Debug, serde::Serialize)]
struct ChatRequest {
    model: &'static str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatResponseChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponseChoice {
    message: ChatMessage,
}

/// Send the prompts plus `s` to a chat model, returning the reply text
pub fn message(model: &'static str, s: &str, prompts: Prompts) -> anyhow::Result<String> {
    message_at(&api_base(), &api_key()?, model, s, prompts)
}

pub(crate) fn message_at(
    base: &str,
    api_key: &str,
    model: &'static str,
    s: &str,
    prompts: Prompts,
) -> anyhow::Result<String> {
    let req = ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: prompts.system.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!("{}\n\n{s}", prompts.user),
            },
        ],
    };
    let client = reqwest::blocking::Client::new();
    tracing::debug!(model, base, "openai chat request");
    let res = client
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth(api_key)
        .json(&req)
        .send()?;
    if res.status() != http::StatusCode::OK {
        return Err(anyhow::anyhow!("HTTP error {}", res.status()));
    }
    let mut out: ChatResponse = res.json()?;
    let Some(c0) = out.choices.pop() else {
        return Err(anyhow::anyhow!("No choices in response: {out:?}"));
    };
    Ok(c0.message.content)
}
