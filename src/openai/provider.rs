use std::pin::Pin;

use anyhow::{Error, bail};
use http::Method;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};

use crate::{
    http_util::client::{HttpClient, read_body},
    openai::api::ChatRequest,
    sse::{DONE, EventDecoder},
};

/// Chunks of a streamed completion in the provider's native shape.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value, Error>> + Send>>;

/// Backend that produces chat completions in the OpenAI wire format.
pub trait ChatProvider: Send + Sync {
    fn complete(&self, req: &ChatRequest) -> impl Future<Output = Result<Value, Error>> + Send;

    fn complete_stream(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChunkStream, Error>> + Send;
}

/// JSON as is; anything else is a plain-text answer.
fn native_or_text(data: &[u8]) -> Value {
    serde_json::from_slice(data)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(data).into_owned()))
}

pub struct OpenAiProvider {
    client: HttpClient,
    url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(client: HttpClient, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: None,
        }
    }

    pub fn api_key(self, api_key: Option<String>) -> Self {
        Self { api_key, ..self }
    }

    async fn post(&self, req: &ChatRequest) -> Result<hyper::Response<hyper::body::Incoming>, Error> {
        let auth = self.api_key.as_ref().map(|key| format!("Bearer {key}"));
        let headers = match &auth {
            Some(auth) => vec![("authorization", auth.as_str())],
            None => Vec::new(),
        };
        log::trace!("Outgoing request struct: {req:?}");
        let res = self
            .client
            .send_json(Method::POST, &self.url, &headers, Some(req))
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = read_body(res).await.unwrap_or_default();
            bail!(
                "Provider answered {status}: {}",
                String::from_utf8_lossy(&body)
            );
        }
        Ok(res)
    }
}

impl ChatProvider for OpenAiProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<Value, Error> {
        let res = self.post(&req.to_upstream(false)).await?;
        let data = read_body(res).await?;
        log::trace!("Incoming response data: {}", String::from_utf8_lossy(&data));
        Ok(native_or_text(&data))
    }

    async fn complete_stream(&self, req: &ChatRequest) -> Result<ChunkStream, Error> {
        let res = self.post(&req.to_upstream(true)).await?;
        let mut body = res.into_body();
        let (tx, rx) = mpsc::channel::<Result<Value, Error>>(32);

        tokio::task::spawn(async move {
            let mut decoder = EventDecoder::default();
            while let Some(frame) = body.frame().await {
                let data = match frame {
                    Ok(frame) => match frame.into_data() {
                        Ok(data) => data,
                        Err(_) => continue,
                    },
                    Err(err) => {
                        let _ = tx.send(Err(err.into())).await;
                        return;
                    }
                };
                log::trace!("Incoming stream data: {}", String::from_utf8_lossy(&data));
                let events = match decoder.decode(&data) {
                    Ok(events) => events,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                for payload in events.into_iter().filter_map(|event| event.data) {
                    if payload == DONE {
                        return;
                    }
                    if tx.send(Ok(native_or_text(payload.as_bytes()))).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
