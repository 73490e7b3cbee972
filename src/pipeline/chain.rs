//! Middleware chain execution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ApiRequest, ApiResponse, Handler, Middleware, Next};
use crate::Result;

/// An ordered middleware chain around a terminal handler.
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    /// Compose `middlewares` (outermost first) around `handler`.
    pub fn compose(middlewares: Vec<Arc<dyn Middleware>>, handler: Arc<dyn Handler>) -> Self {
        Self {
            middlewares,
            handler,
        }
    }

    /// Run the request through the chain. Errors become error responses.
    pub async fn execute(&self, request: ApiRequest) -> ApiResponse {
        let executor = ChainExecutor {
            middlewares: &self.middlewares,
            handler: &self.handler,
            current: 0,
        };
        match executor.run(request).await {
            Ok(response) => response,
            Err(e) => ApiResponse::from_error(&e),
        }
    }
}

struct ChainExecutor<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a Arc<dyn Handler>,
    current: usize,
}

#[async_trait]
impl Next for ChainExecutor<'_> {
    async fn run(&self, request: ApiRequest) -> Result<ApiResponse> {
        let Some(middleware) = self.middlewares.get(self.current) else {
            // Render handler errors here so outer middleware can decorate them.
            return Ok(match self.handler.handle(request).await {
                Ok(response) => response,
                Err(e) => ApiResponse::from_error(&e),
            });
        };

        debug!(middleware = middleware.name(), "entering middleware");
        let next = ChainExecutor {
            middlewares: self.middlewares,
            handler: self.handler,
            current: self.current + 1,
        };
        middleware.process(request, &next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MimirError;
    use http::{HeaderValue, StatusCode};
    use serde_json::json;
    use std::sync::Mutex;

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tag {
        async fn process(&self, request: ApiRequest, next: &dyn Next) -> Result<ApiResponse> {
            self.log.lock().unwrap().push(format!("{}:in", self.name));
            let mut response = next.run(request).await?;
            self.log.lock().unwrap().push(format!("{}:out", self.name));
            response
                .headers
                .append("x-seen", HeaderValue::from_static(self.name));
            Ok(response)
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, request: ApiRequest) -> Result<ApiResponse> {
            Ok(ApiResponse::success(request.body))
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _request: ApiRequest) -> Result<ApiResponse> {
            Err(MimirError::invalid("code", "required"))
        }
    }

    #[tokio::test]
    async fn outermost_runs_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::compose(
            vec![
                Arc::new(Tag {
                    name: "a",
                    log: log.clone(),
                }),
                Arc::new(Tag {
                    name: "b",
                    log: log.clone(),
                }),
            ],
            Arc::new(Echo),
        );
        let resp = pipeline
            .execute(ApiRequest::post("/x", json!({"k": 1})))
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["a:in", "b:in", "b:out", "a:out"]);
        let seen: Vec<_> = resp.headers.get_all("x-seen").iter().collect();
        assert_eq!(seen, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn handler_error_is_rendered_and_decorated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::compose(
            vec![Arc::new(Tag {
                name: "a",
                log: log.clone(),
            })],
            Arc::new(Failing),
        );
        let resp = pipeline.execute(ApiRequest::post("/x", json!({}))).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.header("x-seen"), Some("a"));
        assert_eq!(resp.json().unwrap()["details"][0]["field"], "code");
    }

    #[tokio::test]
    async fn empty_chain_calls_handler() {
        let pipeline = Pipeline::compose(Vec::new(), Arc::new(Echo));
        let resp = pipeline.execute(ApiRequest::post("/x", json!(1))).await;
        assert_eq!(resp.json().unwrap()["data"], 1);
    }
}
