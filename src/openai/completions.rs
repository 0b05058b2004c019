//! OpenAI-compatible chat completions endpoint.
//!
//! Answers come either from a delegated provider, relayed in its native shape
//! (plain text is wrapped), or from the car assistant, reshaped locally. The choice is made once at
//! startup. Every stream that has started ends with `data: [DONE]`.

use std::{sync::Arc, time::Duration};

use anyhow::Error;
use chrono::Utc;
use clap::ValueEnum;
use http::{Request, Response, StatusCode};
use hyper::body::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::{
    Outgoing, Service,
    assistant::Assistant,
    error::{ApiError, internal_error_body},
    http_util::{
        request::{body_json, headers_json},
        response,
    },
    openai::{
        api::{ChatRequest, FinishReason, Role},
        provider::ChatProvider,
        shape::{self, Answer, ChunkBuilder},
        validate::parse_request,
    },
    sse,
    store::RecordStore,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Forward requests to the OpenAI-compatible provider
    #[default]
    Delegate,
    /// Answer with the car assistant and emulate the response shape
    Assistant,
}

pub struct ChatCompletions<P, A> {
    provider: Arc<P>,
    assistant: Arc<A>,
    store: Arc<RecordStore>,
    strategy: Strategy,
    stream_delay: Duration,
}

impl<P, A> Clone for ChatCompletions<P, A> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            assistant: self.assistant.clone(),
            store: self.store.clone(),
            strategy: self.strategy,
            stream_delay: self.stream_delay,
        }
    }
}

type Frames = mpsc::Sender<Bytes>;

/// Sends a frame; `false` once the client is gone.
async fn send(frames: &Frames, frame: Bytes) -> bool {
    frames.send(frame).await.is_ok()
}

/// Wraps plain-text provider output into chunks. Native chunks pass through.
struct PlainText {
    model: String,
    builder: Option<ChunkBuilder>,
}

impl PlainText {
    fn new(model: String) -> Self {
        Self {
            model,
            builder: None,
        }
    }

    fn frames(&mut self, chunk: Value) -> Result<Vec<Bytes>, Error> {
        let Value::String(text) = chunk else {
            return Ok(vec![sse::json_frame(&chunk)?]);
        };
        let mut frames = Vec::new();
        if self.builder.is_none() {
            let builder = ChunkBuilder::new(shape::completion_id(), Utc::now().timestamp(), self.model.clone());
            frames.push(sse::json_frame(&builder.role())?);
            self.builder = Some(builder);
        }
        if let Some(builder) = &self.builder {
            frames.push(sse::json_frame(&builder.content(text))?);
        }
        Ok(frames)
    }

    /// Terminal frame, only when plain text was wrapped.
    fn finish(&self) -> Result<Option<Bytes>, Error> {
        self.builder
            .as_ref()
            .map(|builder| sse::json_frame(&builder.finish(FinishReason::Stop)))
            .transpose()
    }
}

impl<P, A> ChatCompletions<P, A>
where
    P: ChatProvider + 'static,
    A: Assistant + 'static,
{
    pub fn new(provider: Arc<P>, assistant: Arc<A>, store: Arc<RecordStore>) -> Self {
        Self {
            provider,
            assistant,
            store,
            strategy: Strategy::default(),
            stream_delay: Duration::ZERO,
        }
    }

    pub fn strategy(self, strategy: Strategy) -> Self {
        Self { strategy, ..self }
    }

    /// Pause between self-generated content frames.
    pub fn stream_delay(self, stream_delay: Duration) -> Self {
        Self {
            stream_delay,
            ..self
        }
    }

    fn audit(&self, req: &Request<Bytes>) {
        let data = json!({ "body": body_json(req), "headers": headers_json(req.headers()) });
        self.store
            .record_in_background("Chat Interaction", data.to_string());
    }

    async fn delegate(&self, req: ChatRequest) -> Result<Response<Outgoing>, Error> {
        match self.provider.complete(&req).await {
            Ok(Value::String(text)) => {
                let prompt = shape::derive_prompt(&req.messages);
                let answer = Answer {
                    text,
                    tool_calls: None,
                };
                let res = shape::completion(&req, shape::completion_id(), Utc::now().timestamp(), &prompt, &answer);
                response::json(StatusCode::OK, &res)
            }
            Ok(res) => response::json(StatusCode::OK, &res),
            Err(err) => {
                log::error!("Provider request failed: {err:#}");
                Err(ApiError::Internal.into())
            }
        }
    }

    async fn delegate_stream(&self, req: ChatRequest) -> Result<Response<Outgoing>, Error> {
        let (frames, rx) = mpsc::channel(32);
        let provider = self.provider.clone();
        let store = self.store.clone();

        tokio::task::spawn(async move {
            let mut plain = PlainText::new(req.model.clone());
            let failure = match provider.complete_stream(&req).await {
                Ok(mut chunks) => loop {
                    let batch = match chunks.next().await {
                        Some(Ok(chunk)) => plain.frames(chunk),
                        Some(Err(err)) => break Some(err),
                        None => break None,
                    };
                    match batch {
                        Ok(batch) => {
                            for frame in batch {
                                if !send(&frames, frame).await {
                                    return;
                                }
                            }
                        }
                        Err(err) => break Some(err),
                    }
                },
                Err(err) => Some(err),
            };
            let failure = match failure {
                None => match plain.finish() {
                    Ok(Some(frame)) => {
                        if !send(&frames, frame).await {
                            return;
                        }
                        None
                    }
                    Ok(None) => None,
                    Err(err) => Some(err),
                },
                failure => failure,
            };
            if let Some(err) = failure {
                log::error!("Provider stream failed: {err:#}");
                let body = internal_error_body();
                store.record_in_background(
                    "Chat Interaction Error",
                    json!({ "body": body.to_string() }).to_string(),
                );
                if !send(&frames, sse::data_frame(&body.to_string())).await {
                    return;
                }
            }
            send(&frames, sse::done_frame()).await;
        });

        response::event_stream(rx)
    }

    /// The assistant is skipped only when no user turn exists at all.
    async fn generate(&self, req: &ChatRequest, prompt: &str) -> Result<String, Error> {
        if !req.messages.iter().any(|message| message.role == Role::User) {
            return Ok(String::new());
        }
        self.assistant.answer(prompt).await
    }

    async fn emulate(&self, req: ChatRequest) -> Result<Response<Outgoing>, Error> {
        let prompt = shape::derive_prompt(&req.messages);
        let answer = match self.generate(&req, &prompt).await {
            Ok(answer) => shape::post_process(&req, answer),
            Err(err) => {
                log::error!("Assistant request failed: {err:#}");
                return Err(ApiError::Internal.into());
            }
        };
        let res = shape::completion(&req, shape::completion_id(), Utc::now().timestamp(), &prompt, &answer);
        response::json(StatusCode::OK, &res)
    }

    async fn emulate_stream(&self, req: ChatRequest) -> Result<Response<Outgoing>, Error> {
        let (frames, rx) = mpsc::channel(32);
        let this = self.clone();

        tokio::task::spawn(async move {
            let prompt = shape::derive_prompt(&req.messages);
            let answer = match this.generate(&req, &prompt).await {
                Ok(answer) => shape::post_process(&req, answer),
                Err(err) => {
                    log::error!("Assistant request failed: {err:#}");
                    let body = internal_error_body().to_string();
                    this.store
                        .record_in_background("Chat Interaction Error", json!({ "body": body }).to_string());
                    if send(&frames, sse::data_frame(&body)).await {
                        send(&frames, sse::done_frame()).await;
                    }
                    return;
                }
            };
            this.stream_answer(&frames, &req, &answer).await;
        });

        response::event_stream(rx)
    }

    async fn stream_answer(&self, frames: &Frames, req: &ChatRequest, answer: &Answer) {
        let builder = ChunkBuilder::new(shape::completion_id(), Utc::now().timestamp(), req.model.clone());
        let chunks = builder.sequence(answer);
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let frame = match sse::json_frame(chunk) {
                Ok(frame) => frame,
                Err(err) => {
                    log::error!("Cannot encode chunk: {err:#}");
                    let body = internal_error_body().to_string();
                    if send(frames, sse::data_frame(&body)).await {
                        send(frames, sse::done_frame()).await;
                    }
                    return;
                }
            };
            if !send(frames, frame).await {
                log::debug!("Client left the stream");
                return;
            }
            if 0 < i && i < last && !self.stream_delay.is_zero() {
                tokio::time::sleep(self.stream_delay).await;
            }
        }
        send(frames, sse::done_frame()).await;
    }
}

impl<P, A> Service for ChatCompletions<P, A>
where
    P: ChatProvider + 'static,
    A: Assistant + 'static,
{
    async fn call(&self, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
        self.audit(&req);

        let chat = parse_request(req.body())?;
        log::trace!("Incoming request struct: {chat:?}");
        match (self.strategy, chat.is_stream()) {
            (Strategy::Delegate, false) => self.delegate(chat).await,
            (Strategy::Delegate, true) => self.delegate_stream(chat).await,
            (Strategy::Assistant, false) => self.emulate(chat).await,
            (Strategy::Assistant, true) => self.emulate_stream(chat).await,
        }
    }
}
