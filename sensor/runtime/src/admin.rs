use futures::future;
use hyper::{
    header::{self, HeaderValue},
    Body, Method, Request, Response, StatusCode,
};
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Serves process metrics and probes.
#[instrument(skip(registry, ready))]
pub(crate) async fn serve(
    addr: SocketAddr,
    registry: Arc<Registry>,
    ready: watch::Receiver<bool>,
) -> Result<(), hyper::Error> {
    let server = hyper::server::Server::try_bind(&addr)?.serve(
        hyper::service::make_service_fn(move |_conn| {
            let registry = registry.clone();
            let ready = ready.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    future::ok::<_, hyper::Error>(handle(&registry, &ready, req))
                },
            ))
        }),
    );
    let addr = server.local_addr();
    info!(%addr, "HTTP admin server listening");
    server.await
}

fn handle(registry: &Registry, ready: &watch::Receiver<bool>, req: Request<Body>) -> Response<Body> {
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        return status(StatusCode::METHOD_NOT_ALLOWED);
    }

    match req.uri().path() {
        "/metrics" => handle_metrics(registry),
        "/live" => text(StatusCode::OK, "live\n"),
        "/ready" => {
            if *ready.borrow() {
                text(StatusCode::OK, "ready\n")
            } else {
                text(StatusCode::INTERNAL_SERVER_ERROR, "not ready\n")
            }
        }
        _ => status(StatusCode::NOT_FOUND),
    }
}

fn handle_metrics(registry: &Registry) -> Response<Body> {
    let mut buf = String::new();
    if let Err(error) = encode(&mut buf, registry) {
        warn!(%error, "Failed to encode metrics");
        return status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let mut rsp = Response::new(Body::from(buf));
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(OPENMETRICS_CONTENT_TYPE),
    );
    rsp
}

fn text(code: StatusCode, body: &'static str) -> Response<Body> {
    let mut rsp = Response::new(Body::from(body));
    *rsp.status_mut() = code;
    rsp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    rsp
}

fn status(code: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::empty());
    *rsp.status_mut() = code;
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::metrics::counter::Counter;

    fn get(path: &str) -> Request<Body> {
        Request::get(path)
            .body(Body::empty())
            .expect("request must be valid")
    }

    async fn body(rsp: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(rsp.into_body())
            .await
            .expect("body must be readable");
        String::from_utf8(bytes.to_vec()).expect("body must be utf-8")
    }

    #[tokio::test]
    async fn serves_metrics() {
        let mut registry = Registry::default();
        let counter = Counter::<u64>::default();
        registry.register("requests", "Count of requests", counter.clone());
        counter.inc();
        let (_tx, ready) = watch::channel(false);

        let rsp = handle(&registry, &ready, get("/metrics"));
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(
            rsp.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static(OPENMETRICS_CONTENT_TYPE)
        );
        let text = body(rsp).await;
        assert!(text.contains("requests_total 1"), "{text}");
    }

    #[tokio::test]
    async fn probes() {
        let registry = Registry::default();
        let (tx, ready) = watch::channel(false);

        let rsp = handle(&registry, &ready, get("/live"));
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body(rsp).await, "live\n");

        let rsp = handle(&registry, &ready, get("/ready"));
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(rsp).await, "not ready\n");

        tx.send(true).expect("receiver must be held");
        let rsp = handle(&registry, &ready, get("/ready"));
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body(rsp).await, "ready\n");
    }

    #[test]
    fn rejects_unknown_requests() {
        let registry = Registry::default();
        let (_tx, ready) = watch::channel(true);

        let rsp = handle(&registry, &ready, get("/nope"));
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);

        let post = Request::post("/metrics")
            .body(Body::empty())
            .expect("request must be valid");
        let rsp = handle(&registry, &ready, post);
        assert_eq!(rsp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
