use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;

use crate::api::{Content, GenerateRequest, GenerateResponse, GenerationConfig, SystemInstruction};
use crate::utils::url::construct_api_url;

#[derive(Clone, Debug)]
pub enum StreamEvent {
    Chunk(String),
    Error(String),
    End,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(
    payload: &str,
    tx: &mpsc::UnboundedSender<(StreamEvent, u64)>,
    stream_id: u64,
) -> bool {
    match serde_json::from_str::<GenerateResponse>(payload) {
        Ok(response) => {
            if let Some(text) = response.chunk_text() {
                let _ = tx.send((StreamEvent::Chunk(text), stream_id));
            }
            false
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return false;
            }

            let formatted_error = format_api_error(payload);
            let _ = tx.send((StreamEvent::Error(formatted_error), stream_id));
            let _ = tx.send((StreamEvent::End, stream_id));
            true
        }
    }
}

fn process_sse_line(
    line: &str,
    tx: &mpsc::UnboundedSender<(StreamEvent, u64)>,
    stream_id: u64,
) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx, stream_id))
        .unwrap_or(false)
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Report a failed stream: one error event, then the end marker the
/// consumer relies on to clear its in-flight state.
fn send_failure(
    tx: &mpsc::UnboundedSender<(StreamEvent, u64)>,
    stream_id: u64,
    error_text: &str,
) {
    let formatted_error = format_api_error(error_text);
    let _ = tx.send((StreamEvent::Error(formatted_error), stream_id));
    let _ = tx.send((StreamEvent::End, stream_id));
}

fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_instruction: Option<SystemInstruction>,
    pub contents: Vec<Content>,
    pub temperature: f32,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
}

/// Owns the sending half of the stream-event channel and spawns one worker
/// task per outstanding response. Events carry the stream id they belong to
/// so the consumer can drop frames from superseded streams.
#[derive(Clone)]
pub struct StreamDispatcher {
    tx: mpsc::UnboundedSender<(StreamEvent, u64)>,
}

impl StreamDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx_clone = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                base_url,
                api_key,
                model,
                system_instruction,
                contents,
                temperature,
                cancel_token,
                stream_id,
            } = params;

            let request = GenerateRequest {
                system_instruction,
                contents,
                generation_config: Some(GenerationConfig { temperature }),
            };

            tokio::select! {
                _ = async {
                    let endpoint = format!("models/{model}:streamGenerateContent");
                    let url = format!("{}?alt=sse", construct_api_url(&base_url, &endpoint));

                    match client
                        .post(url)
                        .header("Content-Type", "application/json")
                        .header("x-goog-api-key", &api_key)
                        .json(&request)
                        .send()
                        .await
                    {
                        Ok(response) => {
                            if !response.status().is_success() {
                                let error_text = response
                                    .text()
                                    .await
                                    .unwrap_or_else(|_| "<no body>".to_string());
                                send_failure(&tx_clone, stream_id, &error_text);
                                return;
                            }

                            let mut stream = response.bytes_stream();
                            let mut buffer: Vec<u8> = Vec::new();

                            while let Some(chunk) = stream.next().await {
                                if cancel_token.is_cancelled() {
                                    return;
                                }

                                let chunk_bytes = match chunk {
                                    Ok(bytes) => bytes,
                                    Err(e) => {
                                        // A connection dropped mid-reply is a
                                        // failure, not a completed stream.
                                        send_failure(&tx_clone, stream_id, &e.to_string());
                                        return;
                                    }
                                };

                                buffer.extend_from_slice(&chunk_bytes);

                                while let Some(newline_pos) = memchr(b'\n', &buffer) {
                                    let line_str = match std::str::from_utf8(&buffer[..newline_pos]) {
                                        Ok(s) => s.trim(),
                                        Err(e) => {
                                            tracing::warn!("invalid UTF-8 in stream: {e}");
                                            buffer.drain(..=newline_pos);
                                            continue;
                                        }
                                    };

                                    let should_end = process_sse_line(
                                        line_str,
                                        &tx_clone,
                                        stream_id,
                                    );
                                    buffer.drain(..=newline_pos);
                                    if should_end {
                                        return;
                                    }
                                }
                            }

                            // Stream ended naturally (connection closed).
                            let _ = tx_clone.send((StreamEvent::End, stream_id));
                        }
                        Err(e) => {
                            send_failure(&tx_clone, stream_id, &e.to_string());
                        }
                    }
                } => {}
                _ = cancel_token.cancelled() => {}
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, event: StreamEvent, stream_id: u64) {
        let _ = self.tx.send((event, stream_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_sse_line_extracts_candidate_text() {
        let (dispatcher, mut rx) = StreamDispatcher::new();
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hi there"}]}}]}"#;

        assert!(!process_sse_line(line, &dispatcher.tx, 1));

        let (event, stream_id) = rx.try_recv().expect("expected chunk event");
        assert_eq!(stream_id, 1);
        match event {
            StreamEvent::Chunk(text) => assert_eq!(text, "Hi there"),
            other => panic!("expected chunk event, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn process_sse_line_skips_textless_frames() {
        let (dispatcher, mut rx) = StreamDispatcher::new();
        let line = r#"data: {"candidates":[{"finishReason":"STOP"}]}"#;

        assert!(!process_sse_line(line, &dispatcher.tx, 3));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn process_sse_line_ignores_non_data_lines() {
        let (dispatcher, mut rx) = StreamDispatcher::new();
        assert!(!process_sse_line("", &dispatcher.tx, 4));
        assert!(!process_sse_line(": keep-alive", &dispatcher.tx, 4));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn process_sse_line_routes_stream_errors() {
        let (dispatcher, mut rx) = StreamDispatcher::new();
        let error_line = r#"data: {"error":{"message":"quota exceeded","code":429}}"#;

        assert!(process_sse_line(error_line, &dispatcher.tx, 9));

        let (event, stream_id) = rx.try_recv().expect("expected error event");
        assert_eq!(stream_id, 9);
        match event {
            StreamEvent::Error(text) => {
                assert!(text.starts_with("API Error: quota exceeded"));
                assert!(text.contains("```json"));
            }
            other => panic!("expected error event, got {:?}", other),
        }

        let (event, _) = rx.try_recv().expect("expected end event");
        assert!(matches!(event, StreamEvent::End));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_failure_emits_error_then_end() {
        let (dispatcher, mut rx) = StreamDispatcher::new();
        send_failure(&dispatcher.tx, 7, "connection reset by peer");

        let (event, stream_id) = rx.try_recv().expect("expected error event");
        assert_eq!(stream_id, 7);
        match event {
            StreamEvent::Error(text) => {
                assert_eq!(text, "API Error:\n```\nconnection reset by peer\n```");
            }
            other => panic!("expected error event, got {:?}", other),
        }

        let (event, stream_id) = rx.try_recv().expect("expected end event");
        assert_eq!(stream_id, 7);
        assert!(matches!(event, StreamEvent::End));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn format_api_error_prettifies_json_with_summary() {
        let raw = r#"{"error":{"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let formatted = format_api_error(raw);
        assert!(formatted.starts_with("API Error: API key not valid\n```json"));
    }

    #[test]
    fn format_api_error_handles_xml_and_plaintext() {
        assert_eq!(
            format_api_error("<error>bad</error>"),
            "API Error:\n```xml\n<error>bad</error>\n```"
        );
        assert_eq!(
            format_api_error("connection refused"),
            "API Error:\n```\nconnection refused\n```"
        );
    }

    #[test]
    fn format_api_error_handles_empty_body() {
        assert_eq!(format_api_error("  "), "API Error:\n```\n<empty>\n```");
    }
}
