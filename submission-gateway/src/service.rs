use crate::errors::SubmissionGatewayError;
use crate::gateway::Gateway;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::into_boxed_response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Adapts [`Gateway`] to hyper connections on the main listener.
pub struct GatewayService {
    gateway: Arc<Gateway>,
}

impl GatewayService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = SubmissionGatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let gateway = self.gateway.clone();
        Box::pin(async move {
            let response = gateway.handle(req).await;
            Ok(into_boxed_response(response))
        })
    }
}
