use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};

use super::state::AppContext;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// Operational endpoints, grounded in the teacher's admin server: liveness,
/// readiness, and Prometheus exposition. None of these touch the admission
/// or scheduling path.
pub async fn handle_admin(req: Request<Incoming>, ctx: AppContext) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/ready" | "/readyz" => {
            if ctx.is_ready().await {
                Ok(Response::builder().status(200).body(full_body(r#"{"status":"ready"}"#)).unwrap())
            } else {
                Ok(Response::builder().status(503).body(full_body(r#"{"status":"unavailable"}"#)).unwrap())
            }
        }

        "/metrics" => {
            let body = ctx.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder().status(404).body(full_body(r#"{"error":"not found"}"#)).unwrap()),
    }
}
