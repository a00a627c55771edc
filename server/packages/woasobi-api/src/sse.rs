use std::convert::Infallible;
use std::fmt::Display;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use woasobi_universal_agent_schema::AgentEvent;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// One `data: <json>\n\n` frame.
pub fn frame(event: &AgentEvent) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_else(|err| {
        tracing::error!(error = %err, kind = event.kind(), "failed to encode agent event");
        r#"{"type":"error","message":"failed to encode event"}"#.to_string()
    });
    Bytes::from(format!("data: {json}\n\n"))
}

/// Frames events in order. An `Err` becomes one final `error` frame and
/// ends the body.
pub fn frames<S, E>(events: S) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<AgentEvent, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut events = Box::pin(events);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => yield Ok::<Bytes, Infallible>(frame(&event)),
                Err(err) => {
                    tracing::warn!(error = %err, "agent event stream failed");
                    yield Ok(frame(&AgentEvent::error(err.to_string())));
                    break;
                }
            }
        }
    }
}

pub fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    headers
}

pub fn sse_response<S, E>(events: S) -> Response
where
    S: Stream<Item = Result<AgentEvent, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    (sse_headers(), Body::from_stream(frames(events))).into_response()
}
