//! `/api/data` and `/api/tools`: storing and reading audit records directly.

use anyhow::Error;
use http::{Request, Response, StatusCode};
use hyper::body::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    Outgoing,
    error::ApiError,
    http_util::{request::parse_json, response},
    service::path_param,
    store::RecordStore,
};

#[derive(Deserialize)]
struct NewData {
    #[serde(default)]
    name: Value,
    #[serde(default)]
    data: Value,
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}

pub async fn create(store: &RecordStore, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let body: NewData = parse_json(&req)?;
    let (Some(name), Some(data)) = (non_empty(&body.name), non_empty(&body.data)) else {
        return Err(ApiError::BadRequest("Both name and data fields are required".into()).into());
    };
    let record = store.insert(name, Some(data)).await?;
    response::json(
        StatusCode::CREATED,
        &json!({ "message": "Data stored successfully", "data": record }),
    )
}

pub async fn list(store: &RecordStore) -> Result<Response<Outgoing>, Error> {
    let records = store.list().await;
    response::json(
        StatusCode::OK,
        &json!({
            "message": "Data retrieved successfully",
            "count": records.len(),
            "data": records,
        }),
    )
}

pub async fn get(store: &RecordStore, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let id = path_param(&req, "id").unwrap_or_default();
    let record = store
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound("Data not found".into()))?;
    response::json(
        StatusCode::OK,
        &json!({ "message": "Data retrieved successfully", "data": record }),
    )
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NewToolData {
    name: Option<String>,
    data: Option<String>,
}

/// Tool payloads are stored JSON-encoded.
pub async fn create_tool(store: &RecordStore, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
    let body: NewToolData = parse_json(&req)?;
    let name = match body.name.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::BadRequest("\"name\" is not allowed to be empty".into()).into()),
        Some(name) => name,
        None => return Err(ApiError::BadRequest("\"name\" is required".into()).into()),
    };
    let data = match body.data.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::BadRequest("\"data\" is not allowed to be empty".into()).into()),
        Some(data) => Some(serde_json::to_string(data)?),
        None => None,
    };
    let record = store.insert(name, data.as_deref()).await?;
    response::json(
        StatusCode::CREATED,
        &json!({ "message": "Tool data stored successfully", "data": record }),
    )
}
