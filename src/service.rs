use std::{pin::Pin, sync::Arc, time::Instant};

use anyhow::Error;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use serde_json::json;

use crate::{error::ApiError, http_util::response};

pub type Outgoing = BoxBody<Bytes, Error>;

/// Request handler. Bodies arrive fully collected so handlers can see raw bytes.
pub trait Service: Send + Sync {
    fn call(
        &self,
        req: Request<Bytes>,
    ) -> impl Future<Output = Result<Response<Outgoing>, Error>> + Send + '_;
}

pub trait ServiceDyn: Send + Sync {
    fn call_dyn(
        &self,
        req: Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = Result<Response<Outgoing>, Error>> + Send + '_>>;
}

impl<S: Service> ServiceDyn for S {
    fn call_dyn(
        &self,
        req: Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = Result<Response<Outgoing>, Error>> + Send + '_>> {
        Box::pin(self.call(req))
    }
}

/// Wraps a closure returning an owned future.
pub struct Handler<F>(F);

pub fn handler<F, Fut>(f: F) -> Handler<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Outgoing>, Error>> + Send + 'static,
{
    Handler(f)
}

impl<F, Fut> Service for Handler<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<Outgoing>, Error>> + Send + 'static,
{
    fn call(
        &self,
        req: Request<Bytes>,
    ) -> impl Future<Output = Result<Response<Outgoing>, Error>> + Send + '_ {
        (self.0)(req)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Values captured by `:name` segments of the matched route.
#[derive(Clone, Debug, Default)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub fn path_param<'a>(req: &'a Request<Bytes>, name: &str) -> Option<&'a str> {
    req.extensions().get::<PathParams>()?.get(name)
}

struct Route {
    method: Method,
    pattern: Vec<Segment>,
    service: Arc<dyn ServiceDyn>,
}

impl Route {
    fn matches(&self, method: &Method, path: &[&str]) -> Option<PathParams> {
        if self.method != method || self.pattern.len() != path.len() {
            return None;
        }
        let mut params = Vec::new();
        for (segment, value) in self.pattern.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == value => (),
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push((name.clone(), value.to_string())),
            }
        }
        Some(PathParams(params))
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Method and path router. Trailing slashes are ignored, `:name` segments capture.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<S: Service + 'static>(mut self, method: Method, pattern: &str, service: S) -> Self {
        let pattern = segments(pattern)
            .into_iter()
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        self.routes.push(Route {
            method,
            pattern,
            service: Arc::new(service),
        });
        self
    }

    async fn dispatch(&self, mut req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
        if req.method() == Method::OPTIONS {
            let mut res = response::empty(StatusCode::NO_CONTENT)?;
            let headers = res.headers_mut();
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET,HEAD,PUT,PATCH,POST,DELETE"),
            );
            if let Some(requested) = req.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            }
            return Ok(res);
        }

        let path = req.uri().path().to_owned();
        let found = {
            let parts = segments(&path);
            self.routes.iter().find_map(|route| {
                route
                    .matches(req.method(), &parts)
                    .map(|params| (route.service.clone(), params))
            })
        };
        let Some((service, params)) = found else {
            return response::json(
                StatusCode::NOT_FOUND,
                &json!({ "error": "Not Found", "path": path }),
            );
        };
        req.extensions_mut().insert(params);

        match service.call_dyn(req).await {
            Ok(res) => Ok(res),
            Err(err) => match err.downcast::<ApiError>() {
                Ok(api) => api.into_response(),
                Err(err) => {
                    log::error!("Request to {path} failed: {err:#}");
                    response::json(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &json!({ "error": err.to_string() }),
                    )
                }
            },
        }
    }
}

pub(crate) fn allow_any_origin(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

impl Service for Router {
    async fn call(&self, req: Request<Bytes>) -> Result<Response<Outgoing>, Error> {
        let started = Instant::now();
        let method = req.method().clone();
        let uri = req.uri().clone();

        let mut res = self.dispatch(req).await?;
        allow_any_origin(res.headers_mut());

        log::info!(
            "{method} {uri} {} {}ms",
            res.status().as_u16(),
            started.elapsed().as_millis()
        );
        Ok(res)
    }
}
