use std::convert::Infallible;

use anyhow::Error;
use http::{HeaderValue, Response, StatusCode, header};
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use crate::Outgoing;

pub fn full(data: impl Into<Bytes>) -> Outgoing {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn empty(status: StatusCode) -> Result<Response<Outgoing>, Error> {
    Ok(Response::builder().status(status).body(
        Empty::new()
            .map_err(|never: Infallible| match never {})
            .boxed(),
    )?)
}

pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Result<Response<Outgoing>, Error> {
    let data = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(full(data))?)
}

/// Server-sent event response fed by already framed chunks.
pub fn event_stream(frames: mpsc::Receiver<Bytes>) -> Result<Response<Outgoing>, Error> {
    let stream = ReceiverStream::new(frames).map(|data| Ok::<_, Error>(Frame::data(data)));
    let mut res = Response::builder()
        .status(StatusCode::OK)
        .body(StreamBody::new(stream).boxed())?;
    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(res)
}

pub async fn read_bytes(res: Response<Outgoing>) -> Result<Bytes, Error> {
    Ok(res.into_body().collect().await?.to_bytes())
}

pub async fn read_json(res: Response<Outgoing>) -> Result<Value, Error> {
    Ok(serde_json::from_slice(&read_bytes(res).await?)?)
}
