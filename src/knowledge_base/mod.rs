//! `/api/knowledge-base`: validated pass-through to the voice platform's
//! knowledge-base document API.

pub mod client;

pub use self::client::KnowledgeBaseClient;

use std::str::FromStr;

use anyhow::Error;
use http::{Request, Response, StatusCode};
use hyper::body::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::{
    Outgoing,
    error::ApiError,
    http_util::{query, request::parse_json, response},
    service::path_param,
};

pub const DEFAULT_PAGE_SIZE: u32 = 30;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    File,
    Url,
    Text,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Url => "url",
            Self::Text => "text",
        }
    }
}

impl FromStr for DocumentType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "file" => Ok(Self::File),
            "url" => Ok(Self::Url),
            "text" => Ok(Self::Text),
            _ => Err(()),
        }
    }
}

fn invalid(message: String) -> ApiError {
    ApiError::BadRequest(message)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ApiError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(format!("\"{key}\" must be a boolean"))),
    }
}

fn parse_page_size(value: &str) -> Result<u32, ApiError> {
    let number: f64 = value
        .trim()
        .parse()
        .ok()
        .filter(|n: &f64| n.is_finite())
        .ok_or_else(|| invalid("\"page_size\" must be a number".into()))?;
    if number.fract() != 0.0 {
        return Err(invalid("\"page_size\" must be an integer".into()));
    }
    if number < 1.0 {
        return Err(invalid("\"page_size\" must be greater than or equal to 1".into()));
    }
    if number > MAX_PAGE_SIZE as f64 {
        return Err(invalid(format!(
            "\"page_size\" must be less than or equal to {MAX_PAGE_SIZE}"
        )));
    }
    Ok(number as u32)
}

/// Query of the document listing.
#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    pub cursor: Option<String>,
    pub page_size: u32,
    pub search: Option<String>,
    pub show_only_owned_documents: bool,
    pub types: Vec<DocumentType>,
    pub use_typesense: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            cursor: None,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
            show_only_owned_documents: false,
            types: Vec::new(),
            use_typesense: false,
        }
    }
}

impl ListQuery {
    /// Stops at the first invalid parameter.
    pub fn parse(query: Option<&str>) -> Result<Self, ApiError> {
        let pairs = query::parse(query);
        let mut list = Self::default();
        let mut seen: Vec<&str> = Vec::new();
        for (key, value) in &pairs {
            let key = key.as_str();
            let repeated = seen.contains(&key);
            seen.push(key);
            if repeated && key != "types" {
                let kind = match key {
                    "cursor" | "search" => "a string",
                    "page_size" => "a number",
                    "show_only_owned_documents" | "use_typesense" => "a boolean",
                    _ => return Err(invalid(format!("\"{key}\" is not allowed"))),
                };
                return Err(invalid(format!("\"{key}\" must be {kind}")));
            }
            match key {
                "cursor" => list.cursor = Some(value.clone()),
                "search" => list.search = Some(value.clone()),
                "page_size" => list.page_size = parse_page_size(value)?,
                "show_only_owned_documents" => list.show_only_owned_documents = parse_bool(key, value)?,
                "use_typesense" => list.use_typesense = parse_bool(key, value)?,
                "types" => {
                    let kind = value.parse::<DocumentType>().map_err(|()| {
                        invalid(format!(
                            "\"types[{}]\" must be one of [file, url, text]",
                            list.types.len()
                        ))
                    })?;
                    list.types.push(kind);
                }
                _ => return Err(invalid(format!("\"{key}\" is not allowed"))),
            }
        }
        Ok(list)
    }

    /// Upstream query string; empty values are left out, `types` repeats.
    pub fn to_query_string(&self) -> String {
        let page_size = self.page_size.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("cursor", self.cursor.as_deref().unwrap_or_default()),
            ("page_size", page_size.as_str()),
            ("search", self.search.as_deref().unwrap_or_default()),
            (
                "show_only_owned_documents",
                bool_str(self.show_only_owned_documents),
            ),
        ];
        params.extend(self.types.iter().map(|kind| ("types", kind.as_str())));
        params.push(("use_typesense", bool_str(self.use_typesense)));
        query::build(params)
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Collects every problem of a JSON object body before failing.
struct Fields {
    body: Map<String, Value>,
    errors: Vec<String>,
}

impl Fields {
    fn new(body: Value, allowed: &[&str]) -> Result<Self, ApiError> {
        let Value::Object(body) = body else {
            return Err(invalid("\"value\" must be of type object".into()));
        };
        let errors = body
            .keys()
            .filter(|key| !allowed.contains(&key.as_str()))
            .map(|key| format!("\"{key}\" is not allowed"))
            .collect();
        Ok(Self { body, errors })
    }

    fn string(&mut self, key: &str, required: bool) -> Option<String> {
        match self.body.get(key) {
            None if required => self.errors.push(format!("\"{key}\" is required")),
            None => (),
            Some(Value::String(s)) if s.is_empty() => {
                self.errors.push(format!("\"{key}\" is not allowed to be empty"))
            }
            Some(Value::String(s)) => return Some(s.clone()),
            Some(_) => self.errors.push(format!("\"{key}\" must be a string")),
        }
        None
    }

    fn url(&mut self, key: &str, required: bool) -> Option<String> {
        let url = self.string(key, required)?;
        if Url::parse(&url).is_err() {
            self.errors.push(format!("\"{key}\" must be a valid uri"));
            return None;
        }
        Some(url)
    }

    fn object(&mut self, key: &str) -> Option<Map<String, Value>> {
        match self.body.get(key)? {
            Value::Object(map) => Some(map.clone()),
            _ => {
                self.errors.push(format!("\"{key}\" must be of type object"));
                None
            }
        }
    }

    fn finish<T>(self, value: T) -> Result<T, ApiError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(invalid(self.errors.join(". ")))
        }
    }
}

/// Document created from a URL or from plain text.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewDocument {
    #[serde(rename = "type")]
    pub kind: DocumentType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl NewDocument {
    pub fn validate(body: Value) -> Result<Self, ApiError> {
        let mut fields = Fields::new(body, &["type", "name", "url", "text", "metadata"])?;
        let kind = match fields.string("type", true).as_deref().map(str::parse::<DocumentType>) {
            Some(Ok(kind @ (DocumentType::Url | DocumentType::Text))) => Some(kind),
            Some(_) => {
                fields.errors.push("\"type\" must be one of [url, text]".into());
                None
            }
            None => None,
        };
        let name = fields.string("name", true);
        let url = fields.url("url", kind == Some(DocumentType::Url));
        let text = fields.string("text", kind == Some(DocumentType::Text));
        let metadata = fields.object("metadata");
        match (kind, name) {
            (Some(kind), Some(name)) => fields.finish(Self {
                kind,
                name,
                url,
                text,
                metadata,
            }),
            _ => Err(invalid(fields.errors.join(". "))),
        }
    }
}

/// Partial document update. A text update also carries `type: "text"`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DocumentChanges {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocumentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl DocumentChanges {
    pub fn validate(body: Value) -> Result<Self, ApiError> {
        let mut fields = Fields::new(body, &["name", "url", "text", "metadata"])?;
        let changes = Self {
            kind: None,
            name: fields.string("name", false),
            url: fields.url("url", false),
            text: fields.string("text", false),
            metadata: fields.object("metadata"),
        };
        fields.finish(changes)
    }

    pub fn validate_text(body: Value) -> Result<Self, ApiError> {
        let mut fields = Fields::new(body, &["text", "name", "metadata"])?;
        let changes = Self {
            kind: Some(DocumentType::Text),
            text: fields.string("text", true),
            name: fields.string("name", false),
            url: None,
            metadata: fields.object("metadata"),
        };
        fields.finish(changes)
    }
}

fn document_id(req: &Request<Bytes>) -> &str {
    path_param(req, "id").unwrap_or_default()
}

pub async fn list(kb: &KnowledgeBaseClient, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let query = ListQuery::parse(req.uri().query())?;
    let documents = kb.list(&query.to_query_string()).await?;
    response::json(StatusCode::OK, &documents)
}

pub async fn get(kb: &KnowledgeBaseClient, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let document = kb.get(document_id(&req)).await?;
    response::json(StatusCode::OK, &document)
}

pub async fn create(kb: &KnowledgeBaseClient, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let document = NewDocument::validate(parse_json(&req)?)?;
    let created = kb.create(document.kind.as_str(), &document).await?;
    response::json(StatusCode::CREATED, &created)
}

pub async fn update(kb: &KnowledgeBaseClient, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let changes = DocumentChanges::validate(parse_json(&req)?)?;
    let updated = kb.update(document_id(&req), &changes).await?;
    response::json(StatusCode::OK, &updated)
}

pub async fn update_text(kb: &KnowledgeBaseClient, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let changes = DocumentChanges::validate_text(parse_json(&req)?)?;
    let updated = kb.update(document_id(&req), &changes).await?;
    response::json(StatusCode::OK, &updated)
}

pub async fn delete(kb: &KnowledgeBaseClient, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    kb.delete(document_id(&req)).await?;
    response::empty(StatusCode::NO_CONTENT)
}
