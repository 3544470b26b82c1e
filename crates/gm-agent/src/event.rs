use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single NDJSON message emitted by Claude Code (`--output-format stream-json`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First message on stream: session initialisation.
    System(SystemEvent),

    /// An assistant turn (text or tool calls).
    Assistant(AssistantEvent),

    /// A user turn (tool results injected back into the conversation).
    User(UserEvent),

    /// Final result message — emitted once at the very end.
    Result(ResultEvent),

    /// Any message type not explicitly handled above.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemEvent {
    pub subtype: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantEvent {
    pub message: Option<AssistantMessage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub role: Option<String>,
    pub content: Option<Vec<ContentBlock>>,
    pub model: Option<String>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// A single content block inside an assistant or user message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text output.
    Text { text: String },

    /// A tool invocation by the agent.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// Result returned by a tool (appears in user turn).
    ToolResult {
        tool_use_id: String,
        content: Option<Value>,
        is_error: Option<bool>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserEvent {
    pub message: Option<UserMessage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    pub role: Option<String>,
    pub content: Option<Vec<ContentBlock>>,
}

/// Final result event, emitted once when the agent finishes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultEvent {
    pub subtype: Option<String>,
    /// Textual output (may be empty if last turn was a tool call).
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub is_error: Option<bool>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
}

/// Usage/cost fields lifted from a stream's terminal `Result` event.
#[derive(Debug, Clone, Default)]
pub struct StreamUsage {
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub is_error: Option<bool>,
}

/// Scan an NDJSON stream for its terminal `Result` event and lift out the
/// cost/token accounting fields the pipeline persists per session.
pub fn parse_usage(data: &str) -> StreamUsage {
    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        if let Ok(AgentEvent::Result(e)) = serde_json::from_str::<AgentEvent>(line) {
            return StreamUsage {
                cost_usd: e.cost_usd,
                duration_ms: e.duration_ms,
                num_turns: e.num_turns,
                input_tokens: e.usage.as_ref().and_then(|u| u.input_tokens),
                output_tokens: e.usage.as_ref().and_then(|u| u.output_tokens),
                is_error: e.is_error,
            };
        }
    }
    StreamUsage::default()
}

/// Parse a full NDJSON stream and extract the final output text and session ID.
pub fn parse_stream(data: &str) -> (String, Option<String>) {
    let mut output = String::new();
    let mut assistant_text = String::new();
    let mut session_id: Option<String> = None;

    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        let event: AgentEvent = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(_) => continue,
        };
        match event {
            AgentEvent::System(e) => {
                if let Some(sid) = e.session_id {
                    session_id = Some(sid);
                }
            }
            AgentEvent::Assistant(e) => {
                if let Some(msg) = e.message {
                    if let Some(blocks) = msg.content {
                        for block in blocks {
                            if let ContentBlock::Text { text } = block {
                                if !assistant_text.is_empty() {
                                    assistant_text.push('\n');
                                }
                                assistant_text.push_str(&text);
                            }
                        }
                    }
                }
            }
            AgentEvent::Result(e) => {
                if let Some(sid) = e.session_id {
                    session_id = Some(sid);
                }
                if let Some(text) = e.result {
                    output = text;
                }
            }
            _ => {}
        }
    }

    // Fall back to collected assistant text if result was empty
    if output.is_empty() && !assistant_text.is_empty() {
        output = assistant_text;
    }

    (output, session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stream_prefers_result_text_over_assistant_text() {
        let data = concat!(
            r#"{"type":"system","subtype":"init","session_id":"abc123"}"#, "\n",
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"thinking..."}]}}"#, "\n",
            r#"{"type":"result","subtype":"success","result":"done","session_id":"abc123","cost_usd":0.01,"duration_ms":500,"num_turns":2,"usage":{"input_tokens":10,"output_tokens":20}}"#, "\n",
        );
        let (output, session_id) = parse_stream(data);
        assert_eq!(output, "done");
        assert_eq!(session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn parse_stream_falls_back_to_assistant_text_when_result_empty() {
        let data = concat!(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hello"}]}}"#, "\n",
            r#"{"type":"result","subtype":"success","result":null,"session_id":"x"}"#, "\n",
        );
        let (output, _) = parse_stream(data);
        assert_eq!(output, "hello");
    }

    #[test]
    fn parse_usage_extracts_cost_and_tokens() {
        let data = r#"{"type":"result","subtype":"success","result":"ok","cost_usd":0.25,"duration_ms":1200,"num_turns":3,"usage":{"input_tokens":100,"output_tokens":200}}"#;
        let usage = parse_usage(data);
        assert_eq!(usage.cost_usd, Some(0.25));
        assert_eq!(usage.duration_ms, Some(1200));
        assert_eq!(usage.input_tokens, Some(100));
        assert_eq!(usage.output_tokens, Some(200));
    }

    #[test]
    fn parse_usage_defaults_when_no_result_event() {
        let usage = parse_usage("not json\n");
        assert!(usage.cost_usd.is_none());
    }
}
