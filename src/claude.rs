// MIT License
// Copyright (c) 2025 Copydesk Authors

use crate::Prompts;

pub const CHAT_MODEL_BIG: &str = "claude-3-5-sonnet-20240620";
pub const CHAT_MODEL_SMALL: &str = "claude-3-haiku-20240307";

const DEFAULT_BASE: &str = "https://api.anthropic.com";

fn api_base() -> String {
    std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE.to_string())
}

#[derive(Debug, serde::Serialize)]
struct ChatRequest {
    model: &'static str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'static str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponse {
    content: Vec<ChatResponseText>,
}
#[derive(Debug, serde::Deserialize)]
struct ChatResponseText {
    text: String,
}

pub fn message(model: &'static str, s: &str, prompts: Prompts) -> anyhow::Result<String> {
    let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") else {
        return Err(anyhow::anyhow!(
            "Set variable ANTHROPIC_API_KEY to your key"
        ));
    };
    message_at(&api_base(), &api_key, model, s, prompts)
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
        max_tokens: 2048,
        system: prompts.system,
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: format!("{}\n\n{s}", prompts.user),
        }],
    };
    let client = reqwest::blocking::Client::new();
    tracing::debug!(model, base, "anthropic chat request");
    let res = client
        .post(format!("{base}/v1/messages"))
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .json(&req)
        .send()?;
    if res.status() != http::StatusCode::OK {
        return Err(anyhow::anyhow!(
            "HTTP error {} {:?}",
            res.status(),
            res.text()
        ));
    }
    let mut out: ChatResponse = res.json()?;
    let Some(c0) = out.content.pop() else {
        return Err(anyhow::anyhow!("No content in response: {out:?}"));
    };
    Ok(c0.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_returns_last_content_block() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/v1/messages")
                .header("anthropic-version", "2023-06-01");
            then.status(200).json_body(serde_json::json!({
                "content": [{"text": "first"}, {"text": "reply"}]
            }));
        });
        let prompts = Prompts {
            system: "",
            user: "do it",
        };
        let out = message_at(&server.base_url(), "k", CHAT_MODEL_SMALL, "body", prompts).unwrap();
        mock.assert();
        assert_eq!(out, "reply");
    }

    #[test]
    fn empty_content_is_an_error() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::POST).path("/v1/messages");
            then.status(200).json_body(serde_json::json!({"content": []}));
        });
        let prompts = Prompts {
            system: "s",
            user: "u",
        };
        assert!(message_at(&server.base_url(), "k", CHAT_MODEL_SMALL, "b", prompts).is_err());
    }
}
