//! hyper front end for [`EigerRestAdapter`].

use crate::rest::{EigerRestAdapter, Method, ReplyBody, RestReply};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};
use sim_core::{SimError, SimResult};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle to a running HTTP server. Dropping it stops the server.
pub struct HttpServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl HttpServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("HTTP server task failed: {}", e);
        }
    }
}

impl Drop for HttpServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Start serving the REST adapter on `addr` (port 0 picks a free port).
pub fn start_http_server(addr: SocketAddr, adapter: EigerRestAdapter) -> SimResult<HttpServerHandle> {
    let adapter = Arc::new(adapter);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let make_service = make_service_fn(move |_conn| {
        let adapter = adapter.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let adapter = adapter.clone();
                async move { Ok::<_, Infallible>(handle_request(&adapter, req).await) }
            }))
        }
    });

    let server = hyper::Server::try_bind(&addr)
        .map_err(|e| SimError::Transport(format!("failed to bind {}: {}", addr, e)))?
        .serve(make_service);
    let local_addr = server.local_addr();
    let server = server.with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });

    tracing::info!("Eiger REST API listening on http://{}", local_addr);

    let task = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    Ok(HttpServerHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

async fn handle_request(adapter: &EigerRestAdapter, req: Request<Body>) -> Response<Body> {
    let method = match *req.method() {
        hyper::Method::GET => Method::Get,
        hyper::Method::PUT => Method::Put,
        _ => Method::Other,
    };
    let path = req.uri().path().to_string();

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => return into_response(RestReply::text(400, format!("failed to read body: {}", e))),
    };

    into_response(adapter.handle(method, &path, &body).await)
}

fn into_response(reply: RestReply) -> Response<Body> {
    let (content_type, body) = match reply.body {
        ReplyBody::Empty => (None, Body::empty()),
        ReplyBody::Json(value) => (Some("application/json"), Body::from(value.to_string())),
        ReplyBody::Text(text) => (Some("text/plain; charset=utf-8"), Body::from(text)),
    };

    let mut response = Response::new(body);
    *response.status_mut() =
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}
