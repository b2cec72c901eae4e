//! Streams structured answers from the OpenAI chat completions API.

use std::fmt;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::config::OpenAiConfig;
use crate::utils::http::check_status;

/// The marker payload that ends a completion stream.
const DONE: &str = "[DONE]";

/// A named JSON schema the answer of the model is constrained to.
#[derive(Debug, Clone)]
pub struct ResponseSchema<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub schema: Value,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// A decoded `data:` payload of the completion stream.
#[derive(Debug, PartialEq, Eq)]
enum Payload {
    Done,
    Content(String),
    Empty,
}

/// Splits a byte stream into the payloads of its `data:` lines.
///
/// Lines may be split at arbitrary byte positions, including inside of UTF-8 sequences. Comment
/// lines and other fields than `data` are skipped.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    /// Appends `bytes` and returns the payloads of all lines completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if let Some(data) = data_of(&line)? {
                payloads.push(data);
            }
        }
        Ok(payloads)
    }

    /// Returns the payload of an unterminated last line, if any.
    pub fn finish(&mut self) -> Result<Option<String>> {
        let line = std::mem::take(&mut self.buffer);
        data_of(&line)
    }
}

fn data_of(line: &[u8]) -> Result<Option<String>> {
    let line = std::str::from_utf8(line).context("completion stream is not valid UTF-8")?;
    let line = line.trim_end_matches(['\n', '\r']);
    Ok(line
        .strip_prefix("data:")
        .map(|data| data.strip_prefix(' ').unwrap_or(data).to_owned()))
}

fn parse_payload(data: &str) -> Result<Payload> {
    if data.trim() == DONE {
        return Ok(Payload::Done);
    }

    let chunk: CompletionChunk =
        serde_json::from_str(data).context("failed to decode completion chunk")?;
    if let Some(error) = chunk.error {
        anyhow::bail!("model reported an error: {}", error.message);
    }

    let mut content = String::new();
    for choice in chunk.choices {
        if let Some(refusal) = choice.delta.refusal.filter(|r| !r.is_empty()) {
            anyhow::bail!("model refused to answer: {refusal}");
        }
        content.extend(choice.delta.content);
    }

    Ok(match content.is_empty() {
        true => Payload::Empty,
        false => Payload::Content(content),
    })
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("missing OpenAI API key, set OPENAI_KEY or `openai.api_key`")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    /// Asks the model and streams its answer.
    ///
    /// Every non-empty content delta is passed to `on_fragment` as it arrives. An error returned
    /// from `on_fragment` aborts the stream. Returns the concatenation of all fragments.
    #[tracing::instrument(skip_all, fields(model = %self.model, schema = schema.name))]
    pub async fn stream_completion<F>(
        &self,
        system: &str,
        user: &str,
        schema: &ResponseSchema<'_>,
        mut on_fragment: F,
    ) -> Result<String>
    where
        F: FnMut(&str) -> Result<()> + Send,
    {
        let url = self
            .base_url
            .join("chat/completions")
            .context("invalid OpenAI URL")?;

        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "description": schema.description,
                    "strict": true,
                    "schema": schema.schema,
                },
            },
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;
        let response = check_status("OpenAI", response).await?;

        let mut stream = response.bytes_stream();
        let mut decoder = EventStreamDecoder::default();
        let mut answer = String::new();
        let mut fragments = 0;

        let mut handle = |data: String| -> Result<bool> {
            match parse_payload(&data)? {
                Payload::Done => return Ok(true),
                Payload::Content(fragment) => {
                    on_fragment(&fragment)?;
                    answer.push_str(&fragment);
                    fragments += 1;
                }
                Payload::Empty => {}
            }
            Ok(false)
        };

        let mut done = false;
        'stream: while let Some(bytes) = stream.next().await {
            let bytes = bytes.context("failed to read completion stream")?;
            for data in decoder.feed(&bytes)? {
                if handle(data)? {
                    done = true;
                    break 'stream;
                }
            }
        }
        if !done {
            if let Some(data) = decoder.finish()? {
                done = handle(data)?;
            }
        }
        if !done {
            tracing::warn!("Completion stream ended without {}", DONE);
        }

        tracing::debug!("Received {} fragments", fragments);
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use sentiment_test::MockUpstreams;

    use super::*;

    fn client(upstreams: &MockUpstreams) -> OpenAiClient {
        let config = OpenAiConfig {
            api_key: Some("secret".into()),
            base_url: upstreams.openai_url(),
            model: "gpt-4o".into(),
        };
        OpenAiClient::new(reqwest::Client::new(), &config).unwrap()
    }

    fn schema() -> ResponseSchema<'static> {
        ResponseSchema {
            name: "test",
            description: "A test schema",
            schema: json!({ "type": "object" }),
        }
    }

    #[test]
    fn test_decoder_split_lines() {
        let mut decoder = EventStreamDecoder::default();

        assert!(decoder.feed(b"data: {\"a\"").unwrap().is_empty());
        assert_eq!(decoder.feed(b":1}\r\n\r\n").unwrap(), ["{\"a\":1}"]);
        assert_eq!(
            decoder.feed(b": keep-alive\nevent: x\ndata:[DONE]\n").unwrap(),
            ["[DONE]"]
        );
        assert_eq!(decoder.finish().unwrap(), None);
    }

    #[test]
    fn test_decoder_split_utf8() {
        let mut decoder = EventStreamDecoder::default();
        let line = "data: größer\n".as_bytes();

        assert!(decoder.feed(&line[..9]).unwrap().is_empty());
        assert_eq!(decoder.feed(&line[9..]).unwrap(), ["größer"]);
    }

    #[test]
    fn test_decoder_unterminated() {
        let mut decoder = EventStreamDecoder::default();

        assert!(decoder.feed(b"data: [DONE]").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap().as_deref(), Some("[DONE]"));
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("[DONE]").unwrap(), Payload::Done);
        assert_eq!(
            parse_payload(r#"{"choices":[{"delta":{"content":"{\"a"}}]}"#).unwrap(),
            Payload::Content("{\"a".into())
        );
        assert_eq!(
            parse_payload(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            Payload::Empty
        );
        assert_eq!(parse_payload(r#"{"choices":[]}"#).unwrap(), Payload::Empty);

        let err = parse_payload(r#"{"error":{"message":"rate limited"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "model reported an error: rate limited");

        let err =
            parse_payload(r#"{"choices":[{"delta":{"refusal":"I can't"}}]}"#).unwrap_err();
        assert_eq!(err.to_string(), "model refused to answer: I can't");
    }

    #[tokio::test]
    async fn test_stream_completion() {
        sentiment_test::setup();
        let upstreams = MockUpstreams::new();
        let openai = client(&upstreams);

        let mut fragments = Vec::new();
        let answer = openai
            .stream_completion("system", "user", &schema(), |fragment| {
                fragments.push(fragment.to_owned());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(fragments, sentiment_test::default_answer_fragments());
        assert_eq!(
            answer,
            sentiment_test::read_fixture_string("openai/answer.json").trim()
        );
        assert_eq!(upstreams.hits("/openai/chat/completions"), 1);
    }

    #[tokio::test]
    async fn test_stream_without_done() {
        sentiment_test::setup();
        let upstreams = MockUpstreams::new();
        upstreams.set_completion(
            "data: {\"choices\":[{\"delta\":{\"content\":\"{}\"}}]}\n\n",
        );
        let openai = client(&upstreams);

        let answer = openai
            .stream_completion("system", "user", &schema(), |_| Ok(()))
            .await
            .unwrap();

        assert_eq!(answer, "{}");
    }

    #[tokio::test]
    async fn test_stream_error_chunk() {
        sentiment_test::setup();
        let upstreams = MockUpstreams::new();
        upstreams.set_completion(
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\"}}]}\n\n\
             data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        );
        let openai = client(&upstreams);

        let mut fragments = 0;
        let err = openai
            .stream_completion("system", "user", &schema(), |_| {
                fragments += 1;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(fragments, 1);
        assert_eq!(err.to_string(), "model reported an error: overloaded");
    }

    #[tokio::test]
    async fn test_fragment_callback_aborts() {
        sentiment_test::setup();
        let upstreams = MockUpstreams::new();
        let openai = client(&upstreams);

        let err = openai
            .stream_completion("system", "user", &schema(), |_| {
                anyhow::bail!("client went away")
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "client went away");
    }

    #[test]
    fn test_missing_api_key() {
        let config = OpenAiConfig {
            api_key: None,
            ..Default::default()
        };
        assert!(OpenAiClient::new(reqwest::Client::new(), &config).is_err());
    }
}
