//! Single-purpose assistant that only talks about cars, backed by Gemini.

use anyhow::{Context, Error, anyhow, bail};
use http::{Method, Request, Response, StatusCode};
use hyper::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    Outgoing,
    error::ApiError,
    http_util::{
        client::{HttpClient, read_body},
        request::parse_json,
        response,
    },
};

pub const CAR_INSTRUCTION: &str = "You are a helpful AI assistant that specializes exclusively in \
answering questions about cars. Only provide information relevant to automobiles, including makes, \
models, mechanics, history, and general automotive knowledge. If a question is not about cars, \
politely state that you can only answer car-related queries.";

/// The user query wrapped into the fixed instruction.
pub fn restricted_prompt(query: &str) -> String {
    format!("{CAR_INSTRUCTION}\n\nUser query: {query}?")
}

pub trait Assistant: Send + Sync {
    fn answer(&self, prompt: &str) -> impl Future<Output = Result<String, Error>> + Send;
}

pub struct GeminiAssistant {
    client: HttpClient,
    base_url: String,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [GenerateContent<'a>; 1],
}

#[derive(Serialize)]
struct GenerateContent<'a> {
    role: &'a str,
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        Some(content.parts.into_iter().filter_map(|p| p.text).collect())
    }
}

impl GeminiAssistant {
    pub fn new(client: HttpClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model: None,
        }
    }

    pub fn api_key(self, api_key: Option<String>) -> Self {
        Self { api_key, ..self }
    }

    pub fn model(self, model: Option<String>) -> Self {
        Self { model, ..self }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.model.is_some()
    }
}

impl Assistant for GeminiAssistant {
    async fn answer(&self, prompt: &str) -> Result<String, Error> {
        let api_key = self
            .api_key
            .as_deref()
            .context("GOOGLE_API_KEY is not set in environment variables.")?;
        let model = self
            .model
            .as_deref()
            .context("GIMNI_MODAL_NAME is not set in environment variables.")?;

        let text = restricted_prompt(prompt);
        let body = GenerateRequest {
            contents: [GenerateContent {
                role: "user",
                parts: [TextPart { text: &text }],
            }],
        };
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        let res = self
            .client
            .send_json(Method::POST, &url, &[("x-goog-api-key", api_key)], Some(&body))
            .await?;
        let status = res.status();
        let data = read_body(res).await?;
        if !status.is_success() {
            bail!("Gemini answered {status}: {}", String::from_utf8_lossy(&data));
        }
        let res: GenerateResponse = serde_json::from_slice(&data)?;
        res.text().ok_or_else(|| anyhow!("Gemini returned no candidates"))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Question {
    question: Option<String>,
}

/// `POST /api/chat`: `{question}` in, `{question, answer}` out.
pub async fn ask<A: Assistant>(assistant: &A, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let question = match parse_json::<Question>(&req)?.question {
        Some(question) if !question.is_empty() => question,
        Some(_) => {
            return Err(ApiError::BadRequest("\"question\" is not allowed to be empty".into()).into());
        }
        None => return Err(ApiError::BadRequest("\"question\" is required".into()).into()),
    };
    let answer = assistant.answer(&question).await?;
    response::json(StatusCode::OK, &json!({ "question": question, "answer": answer }))
}
