//! Turning a locally generated answer into OpenAI-shaped responses.
//!
//! Token counts here are character counts. There is no tokenizer behind the
//! assistant, so `usage` and the `max_tokens` limit are approximations.

use serde_json::{Value, json};
use smallvec::smallvec;
use uuid::Uuid;

use crate::openai::api::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, ChatRequest, Choice, ChunkChoice,
    Delta, Echo, FinishReason, FunctionCall, Message, ResponseFormat, ResponseFormatKind, Role,
    Stop, Tool, ToolCall, Usage,
};

/// Arguments of a synthesized tool call.
pub const STUB_ARGUMENTS: &str = "{}";

/// Text of the latest user message, empty when there is none.
pub fn derive_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.text())
        .unwrap_or_default()
}

pub fn apply_response_format(answer: String, format: Option<&ResponseFormat>) -> String {
    match format {
        Some(ResponseFormat {
            kind: ResponseFormatKind::JsonObject,
            ..
        }) if serde_json::from_str::<Value>(&answer).is_err() => {
            json!({ "response": answer }).to_string()
        }
        _ => answer,
    }
}

pub fn truncate_chars(answer: String, limit: Option<u32>) -> String {
    match limit {
        Some(limit) => match answer.char_indices().nth(limit as usize) {
            Some((end, _)) => answer[..end].to_string(),
            None => answer,
        },
        None => answer,
    }
}

/// Cuts the answer before the first stop sequence that occurs, checked in request order.
pub fn truncate_at_stop(mut answer: String, stop: Option<&Stop>) -> String {
    let Some(stop) = stop else {
        return answer;
    };
    let found = stop
        .sequences()
        .iter()
        .filter(|sequence| !sequence.is_empty())
        .find_map(|sequence| answer.find(sequence.as_str()));
    if let Some(end) = found {
        answer.truncate(end);
    }
    answer
}

/// Placeholder call to the first declared tool. No tool is actually selected or run.
pub fn stub_tool_calls(tools: &[Tool]) -> Option<Vec<ToolCall>> {
    let tool = tools.first()?;
    Some(vec![ToolCall {
        index: None,
        id: format!("call_{}", Uuid::new_v4().simple()),
        kind: "function".into(),
        function: FunctionCall {
            name: tool.function.name.clone(),
            arguments: STUB_ARGUMENTS.into(),
        },
    }])
}

#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    pub text: String,
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Answer {
    pub fn finish_reason(&self) -> FinishReason {
        match self.tool_calls {
            Some(_) => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        }
    }

    /// Message content; null once tool calls take over.
    pub fn content(&self) -> Option<String> {
        match self.tool_calls {
            Some(_) => None,
            None => Some(self.text.clone()),
        }
    }
}

pub fn post_process(req: &ChatRequest, answer: String) -> Answer {
    let answer = apply_response_format(answer, req.response_format.as_ref());
    let answer = truncate_chars(answer, req.completion_limit());
    let answer = truncate_at_stop(answer, req.stop.as_ref());
    Answer {
        text: answer,
        tool_calls: stub_tool_calls(req.tools()),
    }
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub fn completion(
    req: &ChatRequest,
    id: String,
    created: i64,
    prompt: &str,
    answer: &Answer,
) -> ChatCompletion {
    let choices = (0..req.choice_count())
        .map(|index| Choice {
            index,
            message: AssistantMessage {
                role: Role::Assistant,
                content: answer.content(),
                tool_calls: answer.tool_calls.clone(),
            },
            logprobs: None,
            finish_reason: answer.finish_reason(),
        })
        .collect();
    ChatCompletion {
        id,
        object: "chat.completion".into(),
        created,
        model: req.model.clone(),
        choices,
        usage: Usage::new(prompt.chars().count(), answer.text.chars().count()),
        echo: Echo::from(req),
    }
}

/// Builds the chunks of one streamed response; all share the id and timestamp.
pub struct ChunkBuilder {
    id: String,
    created: i64,
    model: String,
}

impl ChunkBuilder {
    pub fn new(id: String, created: i64, model: String) -> Self {
        Self { id, created, model }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".into(),
            created: self.created,
            model: self.model.clone(),
            choices: smallvec![ChunkChoice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason,
            }],
        }
    }

    pub fn role(&self) -> ChatCompletionChunk {
        self.chunk(
            Delta {
                role: Some(Role::Assistant),
                content: Some(None),
                tool_calls: None,
            },
            None,
        )
    }

    pub fn content(&self, text: String) -> ChatCompletionChunk {
        self.chunk(
            Delta {
                content: Some(Some(text)),
                ..Default::default()
            },
            None,
        )
    }

    pub fn tool_calls(&self, calls: &[ToolCall]) -> ChatCompletionChunk {
        let calls = calls
            .iter()
            .zip(0..)
            .map(|(call, index)| ToolCall {
                index: Some(index),
                ..call.clone()
            })
            .collect();
        self.chunk(
            Delta {
                tool_calls: Some(calls),
                ..Default::default()
            },
            None,
        )
    }

    pub fn finish(&self, reason: FinishReason) -> ChatCompletionChunk {
        self.chunk(Delta::default(), Some(reason))
    }

    /// Full frame sequence of an answer, without the `[DONE]` sentinel.
    pub fn sequence(&self, answer: &Answer) -> Vec<ChatCompletionChunk> {
        let mut chunks = vec![self.role()];
        match &answer.tool_calls {
            Some(calls) => chunks.push(self.tool_calls(calls)),
            None => chunks.extend(answer.text.chars().map(|c| self.content(c.to_string()))),
        }
        chunks.push(self.finish(answer.finish_reason()));
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::api::{Content, ContentPart, ToolFunction};
    use serde_json::Map;

    fn message(role: Role, content: Content) -> Message {
        Message {
            role,
            content,
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    fn request(value: Value) -> ChatRequest {
        serde_json::from_value(value).unwrap()
    }

    fn tool(name: &str) -> Tool {
        Tool {
            kind: "function".into(),
            function: ToolFunction {
                name: name.into(),
                rest: Map::new(),
            },
        }
    }

    #[test]
    fn prompt_from_latest_user_message() {
        let messages = vec![
            message(Role::System, Content::Text("cars only".into())),
            message(Role::User, Content::Text("old".into())),
            message(Role::Assistant, Content::Text("reply".into())),
            message(
                Role::User,
                Content::Parts(vec![
                    ContentPart {
                        kind: Some("text".into()),
                        text: Some("what is".into()),
                        image_url: None,
                    },
                    ContentPart {
                        kind: Some("image_url".into()),
                        text: None,
                        image_url: Some(json!({ "url": "https://x" })),
                    },
                    ContentPart {
                        kind: Some("text".into()),
                        text: Some("a V8?".into()),
                        image_url: None,
                    },
                ]),
            ),
        ];
        assert_eq!(derive_prompt(&messages), "what is\na V8?");
    }

    #[test]
    fn no_user_message_gives_empty_prompt() {
        let messages = vec![message(Role::System, Content::Text("cars only".into()))];
        assert_eq!(derive_prompt(&messages), "");
    }

    #[test]
    fn json_object_format() {
        let format = ResponseFormat {
            kind: ResponseFormatKind::JsonObject,
            json_schema: None,
        };
        let valid = r#"{"make":"Saab","year":1987}"#.to_string();
        assert_eq!(apply_response_format(valid.clone(), Some(&format)), valid);

        let wrapped = apply_response_format("plain text".into(), Some(&format));
        assert_eq!(
            serde_json::from_str::<Value>(&wrapped).unwrap(),
            json!({ "response": "plain text" })
        );

        assert_eq!(apply_response_format("plain".into(), None), "plain");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("Äpfel und Birnen".into(), Some(5)), "Äpfel");
        assert_eq!(truncate_chars("short".into(), Some(50)), "short");
        assert_eq!(truncate_chars("short".into(), None), "short");
    }

    #[test]
    fn first_listed_stop_wins() {
        let stop = Stop::Many(vec!["END".into(), "brake".into()]);
        assert_eq!(
            truncate_at_stop("check the brake fluid END now".into(), Some(&stop)),
            "check the brake fluid "
        );
        let stop = Stop::One("\n".into());
        assert_eq!(truncate_at_stop("line one\nline two".into(), Some(&stop)), "line one");
        let stop = Stop::Many(vec!["".into(), "zzz".into()]);
        assert_eq!(truncate_at_stop("untouched".into(), Some(&stop)), "untouched");
    }

    #[test]
    fn tools_override_content() {
        let req = request(json!({
            "model": "gpt-x",
            "messages": [{ "role": "user", "content": "hi" }],
            "tools": [
                { "type": "function", "function": { "name": "lookup_vin" } },
                { "type": "function", "function": { "name": "other" } }
            ],
            "n": 3
        }));
        let answer = post_process(&req, "text".into());
        let calls = answer.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "lookup_vin");
        assert!(calls[0].id.starts_with("call_"));

        let res = completion(&req, completion_id(), 0, "hi", &answer);
        assert_eq!(res.choices.len(), 3);
        for choice in &res.choices {
            assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
            assert_eq!(choice.message.content, None);
        }
        assert!(stub_tool_calls(&[]).is_none());
        assert_eq!(stub_tool_calls(&[tool("a")]).unwrap()[0].function.arguments, "{}");
    }

    #[test]
    fn plain_completion() {
        let req = request(json!({
            "model": "gpt-x",
            "messages": [{ "role": "user", "content": "hello" }],
            "seed": 42,
            "metadata": { "trace": "t-1" }
        }));
        let answer = post_process(&req, "Hi there".into());
        let res = completion(&req, "chatcmpl-1".into(), 1_700_000_000, "hello", &answer);
        let value = serde_json::to_value(&res).unwrap();

        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["model"], "gpt-x");
        assert_eq!(value["choices"].as_array().unwrap().len(), 1);
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"], json!({
            "prompt_tokens": 5,
            "completion_tokens": 8,
            "total_tokens": 13
        }));
        assert_eq!(value["system_fingerprint"], "42");
        assert_eq!(value["metadata"], json!({ "trace": "t-1" }));
        assert!(value.get("service_tier").is_none());
    }

    #[test]
    fn limits_then_stop() {
        let req = request(json!({
            "model": "m",
            "messages": [{ "role": "user", "content": "q" }],
            "max_tokens": 100,
            "max_completion_tokens": 12,
            "stop": ["fluid"]
        }));
        assert_eq!(post_process(&req, "check brake fluid level".into()).text, "check brake ");
    }

    #[test]
    fn chunk_sequence() {
        let builder = ChunkBuilder::new("chatcmpl-1".into(), 7, "m".into());
        let answer = Answer {
            text: "Hi".into(),
            tool_calls: None,
        };
        let chunks = builder.sequence(&answer);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.id == "chatcmpl-1" && c.choices.len() == 1));
        assert_eq!(chunks[0].choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(chunks[1].choices[0].delta.content, Some(Some("H".into())));
        assert_eq!(chunks[2].choices[0].delta.content, Some(Some("i".into())));
        assert_eq!(chunks[3].choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(chunks[3].choices[0].delta, Delta::default());

        let answer = Answer {
            text: "ignored".into(),
            tool_calls: stub_tool_calls(&[tool("lookup")]),
        };
        let chunks = builder.sequence(&answer);
        assert_eq!(chunks.len(), 3);
        let calls = chunks[1].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, Some(0));
        assert_eq!(chunks[2].choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }
}
