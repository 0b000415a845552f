//! SSE events endpoint
//!
//! Each connection registers a bounded channel with the subscriber registry
//! and streams whatever the broadcaster and heartbeat push into it.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::AppState;
use pipeline_core::{OutboundEvent, Subscription};

/// SSE event stream of object lines
///
/// GET /v1/events
pub async fn events_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(last_event_id) = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
    {
        tracing::debug!(last_event_id, "Subscriber reconnecting");
    }

    let (tx, rx) = mpsc::channel(state.config.pipeline.subscriber_buffer);
    let Some(subscription) = state.registry.subscribe(tx) else {
        tracing::warn!("Failed to register subscriber");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(
                header::RETRY_AFTER,
                state.config.pipeline.retry_after_secs.to_string(),
            )],
            "Subscriber could not be registered",
        )
            .into_response();
    };

    tracing::info!(
        subscriber_id = subscription.id(),
        active = state.registry.len(),
        "Subscriber connected"
    );

    let stream =
        EventStream::new(rx, subscription).take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(stream).into_response()
}

/// Subscriber channel converted to SSE events
///
/// Owns the [`Subscription`], so dropping the stream (client gone, shutdown)
/// removes the subscriber from the registry.
struct EventStream {
    inner: ReceiverStream<OutboundEvent>,
    subscription: Subscription,
}

impl EventStream {
    fn new(receiver: mpsc::Receiver<OutboundEvent>, subscription: Subscription) -> Self {
        Self {
            inner: ReceiverStream::new(receiver),
            subscription,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(sse_event(&event)))),
            Poll::Ready(None) => {
                tracing::debug!(
                    subscriber_id = self.subscription.id(),
                    "SSE stream closed (channel ended)"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        tracing::info!(subscriber_id = self.subscription.id(), "Subscriber disconnected");
    }
}

/// SSE framing for an outbound event
fn sse_event(event: &OutboundEvent) -> Event {
    Event::default().event(event.name).data(&*event.data)
}
