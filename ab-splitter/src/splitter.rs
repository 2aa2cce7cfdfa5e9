use crate::errors::SplitterError;
use crate::metrics_defs::{ORIGIN_ERRORS, ORIGIN_REQUEST_DURATION, VARIANT_ASSIGNMENTS};
use crate::variant::{Variant, assign, is_landing_path};
use http::header::{CONTENT_LENGTH, COOKIE, HeaderName, HeaderValue, SET_COOKIE, USER_AGENT};
use http::uri::PathAndQuery;
use http::{Request, Response, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Body, Bytes};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::headers::{add_via_header, filter_hop_by_hop};
use shared::http::make_error_response;
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use url::Url;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type forwarded to the asset origin
pub type ForwardBody = UnsyncBoxBody<Bytes, BoxError>;

pub const VARIANT_HEADER: HeaderName = HeaderName::from_static("x-ab-variant");

const CLIENT_IP_HEADER: &str = "cf-connecting-ip";

/// Rewrites landing page requests to the visitor's variant and forwards
/// everything to the asset origin.
pub struct Splitter {
    client: Client<HttpConnector, ForwardBody>,
    assets_url: Url,
    timeout: Duration,
}

impl Splitter {
    pub fn new(assets_url: Url, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Splitter {
            client,
            assets_url,
            timeout,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Bytes>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        if !is_landing_path(req.uri().path()) {
            let req = req.map(|body| body.map_err(Into::into).boxed_unsync());
            return self.forward(req).await.unwrap_or_else(error_response);
        }

        let assignment = {
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
            };
            assign(
                cookie_header(&req).as_deref(),
                header(CLIENT_IP_HEADER),
                header(USER_AGENT.as_str()),
            )
        };
        let variant = assignment.variant;

        counter!(
            VARIANT_ASSIGNMENTS,
            "variant" => variant.as_str(),
            "source" => assignment.source.as_str()
        )
        .increment(1);
        tracing::debug!(
            variant = variant.as_str(),
            source = assignment.source.as_str(),
            "Assigned landing page variant"
        );

        let rewritten = match rewrite(req, variant) {
            Ok(rewritten) => rewritten,
            Err(e) => return error_response(e),
        };

        match self.forward(rewritten).await {
            Ok(mut response) => {
                let headers = response.headers_mut();
                if let Ok(cookie) = HeaderValue::from_str(&variant.cookie()) {
                    headers.insert(SET_COOKIE, cookie);
                }
                headers.insert(VARIANT_HEADER, HeaderValue::from_static(variant.as_str()));
                response
            }
            Err(e) => error_response(e),
        }
    }

    async fn forward(
        &self,
        request: Request<ForwardBody>,
    ) -> Result<Response<Bytes>, SplitterError> {
        let start = Instant::now();
        let result = send_to_origin(&self.client, &self.assets_url, request, self.timeout).await;

        match &result {
            Ok(response) => {
                histogram!(
                    ORIGIN_REQUEST_DURATION,
                    "status" => response.status().as_str().to_string()
                )
                .record(start.elapsed().as_secs_f64());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to forward request to asset origin");
                counter!(ORIGIN_ERRORS).increment(1);
            }
        }
        result
    }
}

fn cookie_header<B>(req: &Request<B>) -> Option<String> {
    let values: Vec<&str> = req
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join("; "))
    }
}

/// Points a landing page request at the variant's asset, keeping the query
/// string. The body is dropped.
fn rewrite<B>(req: Request<B>, variant: Variant) -> Result<Request<ForwardBody>, SplitterError> {
    let (mut parts, _body) = req.into_parts();

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{query}", variant.path()),
        None => variant.path().to_string(),
    };
    let path_and_query = PathAndQuery::try_from(path_and_query)
        .map_err(|e| SplitterError::InternalError(format!("Invalid rewritten path: {e}")))?;

    let mut uri_parts = parts.uri.into_parts();
    uri_parts.path_and_query = Some(path_and_query);
    parts.uri = Uri::from_parts(uri_parts)
        .map_err(|e| SplitterError::InternalError(format!("Invalid rewritten URI: {e}")))?;
    parts.headers.remove(CONTENT_LENGTH);

    let body = Empty::<Bytes>::new().map_err(|e| match e {}).boxed_unsync();
    Ok(Request::from_parts(parts, body))
}

fn error_response(e: SplitterError) -> Response<Bytes> {
    make_error_response(e.status_code())
}

/// Sends `request` to the asset origin and buffers the response.
///
/// The timeout covers the whole exchange including reading the response
/// body. Hop-by-hop headers are filtered and `Via` is added in both
/// directions.
pub async fn send_to_origin(
    client: &Client<HttpConnector, ForwardBody>,
    assets_url: &Url,
    request: Request<ForwardBody>,
    timeout_duration: Duration,
) -> Result<Response<Bytes>, SplitterError> {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut url = assets_url.clone();
    if let Some((path, query)) = path_and_query.split_once('?') {
        url.set_path(path);
        url.set_query(Some(query));
    } else {
        url.set_path(path_and_query);
        url.set_query(None);
    }
    let origin_uri: Uri = url
        .as_str()
        .parse()
        .map_err(|e| SplitterError::InternalError(format!("Invalid origin URI: {e}")))?;

    let (mut parts, body) = request.into_parts();
    let request_version = parts.version;
    filter_hop_by_hop(&mut parts.headers, request_version);
    add_via_header(&mut parts.headers, request_version);
    parts.uri = origin_uri;
    // The legacy client speaks HTTP/1.1 to the origin whatever the visitor used.
    parts.version = http::Version::HTTP_11;

    let exchange = async {
        let response = client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| SplitterError::UpstreamRequestFailed(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        let response_version = parts.version;
        filter_hop_by_hop(&mut parts.headers, response_version);
        add_via_header(&mut parts.headers, response_version);

        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| SplitterError::ResponseBodyError(e.to_string()))?;

        Ok::<_, SplitterError>(Response::from_parts(parts, body))
    };

    timeout(timeout_duration, exchange)
        .await
        .map_err(|_| SplitterError::UpstreamTimeout)?
}
