//! Route table of the relay.

use std::{sync::Arc, time::Duration};

use anyhow::Error;
use chrono::Utc;
use http::{Method, Request, Response, StatusCode};
use hyper::body::Bytes;
use serde_json::json;

use crate::{
    Outgoing, Router, Service,
    assistant::{self, Assistant},
    data,
    http_util::response,
    knowledge_base::{self, KnowledgeBaseClient},
    openai::{
        completions::{ChatCompletions, Strategy},
        provider::ChatProvider,
    },
    service::handler,
    store::RecordStore,
    webhook,
};

pub const SERVICE_NAME: &str = "prototype-voice-bot";

pub struct App<P, A> {
    store: Arc<RecordStore>,
    assistant: Arc<A>,
    completions: ChatCompletions<P, A>,
    knowledge_base: KnowledgeBaseClient,
    webhook_secret: Option<String>,
}

/// Passes shared state along with each request.
fn with_state<T, F, Fut>(state: Arc<T>, f: F) -> impl Service + 'static
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Outgoing>, Error>> + Send + 'static,
{
    handler(move |req| f(state.clone(), req))
}

fn health() -> Result<Response<Outgoing>, Error> {
    response::json(
        StatusCode::OK,
        &json!({
            "ok": true,
            "service": SERVICE_NAME,
            "timestamp": Utc::now().timestamp_millis(),
        }),
    )
}

impl<P, A> App<P, A>
where
    P: ChatProvider + 'static,
    A: Assistant + 'static,
{
    pub fn new(provider: P, assistant: A, store: Arc<RecordStore>, knowledge_base: KnowledgeBaseClient) -> Self {
        let assistant = Arc::new(assistant);
        Self {
            completions: ChatCompletions::new(Arc::new(provider), assistant.clone(), store.clone()),
            store,
            assistant,
            knowledge_base,
            webhook_secret: None,
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.completions = self.completions.strategy(strategy);
        self
    }

    pub fn stream_delay(mut self, delay: Duration) -> Self {
        self.completions = self.completions.stream_delay(delay);
        self
    }

    pub fn webhook_secret(self, webhook_secret: Option<String>) -> Self {
        Self {
            webhook_secret,
            ..self
        }
    }

    pub fn router(self) -> Router {
        let completions = self.completions.clone();
        let app = Arc::new(self);

        Router::new()
            .route(Method::GET, "/health", handler(|_| async { health() }))
            // Chat
            .route(
                Method::POST,
                "/api/chat",
                with_state(app.clone(), |app, req| async move {
                    assistant::ask(app.assistant.as_ref(), req).await
                }),
            )
            .route(Method::POST, "/api/chat/v1/chat/completions", completions.clone())
            .route(Method::POST, "/api/chat/chat/completions", completions)
            // Audit records
            .route(
                Method::POST,
                "/api/data",
                with_state(app.clone(), |app, req| async move { data::create(&app.store, req).await }),
            )
            .route(
                Method::GET,
                "/api/data",
                with_state(app.clone(), |app, _| async move { data::list(&app.store).await }),
            )
            .route(
                Method::GET,
                "/api/data/:id",
                with_state(app.clone(), |app, req| async move { data::get(&app.store, req).await }),
            )
            .route(
                Method::POST,
                "/api/tools",
                with_state(app.clone(), |app, req| async move { data::create_tool(&app.store, req).await }),
            )
            // Webhooks
            .route(
                Method::POST,
                "/api/webhooks/elevenlabs",
                with_state(app.clone(), |app, req| async move {
                    webhook::receive_signed(&app.store, app.webhook_secret.as_deref(), req).await
                }),
            )
            .route(
                Method::POST,
                "/api/webhooks/elevenlabs-pre",
                with_state(app.clone(), |app, req| async move {
                    webhook::record(&app.store, "Pre-Call Interaction", req).await
                }),
            )
            .route(
                Method::POST,
                "/api/webhooks/elevenlabs-post",
                with_state(app.clone(), |app, req| async move {
                    webhook::record(&app.store, "Post-Call Interaction", req).await
                }),
            )
            .route(
                Method::GET,
                "/api/webhooks/elevenlabs-post",
                with_state(app.clone(), |app, req| async move {
                    webhook::record(&app.store, "Post-Call Interaction", req).await
                }),
            )
            .route(
                Method::POST,
                "/api/webhooks/elevenlabs-tool",
                with_state(app.clone(), |app, req| async move {
                    webhook::record(&app.store, "Tool Interaction", req).await
                }),
            )
            // Knowledge base
            .route(
                Method::GET,
                "/api/knowledge-base",
                with_state(app.clone(), |app, req| async move {
                    knowledge_base::list(&app.knowledge_base, req).await
                }),
            )
            .route(
                Method::POST,
                "/api/knowledge-base",
                with_state(app.clone(), |app, req| async move {
                    knowledge_base::create(&app.knowledge_base, req).await
                }),
            )
            .route(
                Method::GET,
                "/api/knowledge-base/:id",
                with_state(app.clone(), |app, req| async move {
                    knowledge_base::get(&app.knowledge_base, req).await
                }),
            )
            .route(
                Method::PUT,
                "/api/knowledge-base/:id",
                with_state(app.clone(), |app, req| async move {
                    knowledge_base::update(&app.knowledge_base, req).await
                }),
            )
            .route(
                Method::PUT,
                "/api/knowledge-base/:id/text",
                with_state(app.clone(), |app, req| async move {
                    knowledge_base::update_text(&app.knowledge_base, req).await
                }),
            )
            .route(
                Method::DELETE,
                "/api/knowledge-base/:id",
                with_state(app, |app, req| async move {
                    knowledge_base::delete(&app.knowledge_base, req).await
                }),
            )
    }
}
