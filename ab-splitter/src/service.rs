use crate::errors::SplitterError;
use crate::splitter::Splitter;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::into_boxed_response;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub struct SplitterService {
    splitter: Arc<Splitter>,
}

impl SplitterService {
    pub fn new(splitter: Splitter) -> Self {
        Self {
            splitter: Arc::new(splitter),
        }
    }
}

impl Service<Request<Incoming>> for SplitterService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = SplitterError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let splitter = self.splitter.clone();
        Box::pin(async move { Ok(into_boxed_response(splitter.handle(req).await)) })
    }
}
