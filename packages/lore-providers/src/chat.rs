use std::{pin::Pin, time::Duration};

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::Value;

use lore_domain::records::ChatMessage;

use crate::{Error, Result};

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
	pub temperature: f32,
	pub max_tokens: u32,
	/// Requests a JSON object response.
	pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
	Delta(String),
	Done,
}

/// Returns the full completion text. A completion without content is returned as an empty string.
pub async fn chat(
	cfg: &lore_config::LlmProviderConfig,
	messages: &[ChatMessage],
	options: ChatOptions,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let body = request_body(cfg, messages, options, false);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_chat_response(json)
}

/// Opens a server-sent event completion and yields content deltas in order.
///
/// Dropping the stream drops the response body and closes the connection.
pub async fn chat_stream(
	cfg: &lore_config::LlmProviderConfig,
	messages: &[ChatMessage],
	options: ChatOptions,
) -> Result<ChatStream> {
	let timeout = Duration::from_millis(cfg.timeout_ms);
	// Bounds every body read, so a stalled upstream ends the stream with an error.
	let client = Client::builder().connect_timeout(timeout).read_timeout(timeout).build()?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let body = request_body(cfg, messages, options, true);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?
		.error_for_status()?;
	let mut events = Box::pin(res.bytes_stream().eventsource());
	let stream = async_stream::stream! {
		while let Some(event) = events.next().await {
			let event = match event {
				Ok(event) => event,
				Err(err) => {
					yield Err(Error::InvalidResponse { message: format!("Chat stream failed: {err}.") });

					return;
				},
			};

			match parse_stream_event(&event.data) {
				Ok(StreamEvent::Done) => return,
				Ok(StreamEvent::Delta(text)) =>
					if !text.is_empty() {
						yield Ok(text);
					},
				Err(err) => {
					yield Err(err);

					return;
				},
			}
		}
	};

	Ok(Box::pin(stream))
}

fn request_body(
	cfg: &lore_config::LlmProviderConfig,
	messages: &[ChatMessage],
	options: ChatOptions,
	stream: bool,
) -> Value {
	let mut body = serde_json::json!({
		"model": cfg.model,
		"messages": messages,
		"temperature": options.temperature,
		"max_tokens": options.max_tokens,
		"stream": stream,
	});

	if options.json {
		body["response_format"] = serde_json::json!({ "type": "json_object" });
	}

	body
}

fn parse_chat_response(json: Value) -> Result<String> {
	let choice = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing choices.".to_string(),
		})?;
	let content = choice
		.get("message")
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.unwrap_or_default();

	Ok(content.to_string())
}

/// Parses one SSE `data:` payload of a streamed completion.
pub fn parse_stream_event(data: &str) -> Result<StreamEvent> {
	let data = data.trim();

	if data == "[DONE]" {
		return Ok(StreamEvent::Done);
	}

	let json: Value = serde_json::from_str(data)?;
	let choice = json.get("choices").and_then(|v| v.as_array()).and_then(|arr| arr.first());
	let Some(choice) = choice else {
		return Ok(StreamEvent::Delta(String::new()));
	};
	let content = choice
		.get("delta")
		.and_then(|delta| delta.get("content"))
		.and_then(|c| c.as_str())
		.unwrap_or_default();

	Ok(StreamEvent::Delta(content.to_string()))
}
