use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use dorma_domain::{AvailabilitySnapshot, FeedEvent};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/units/{id}/availability", get(get_availability))
        .route("/v1/units/{id}/stream", get(stream_unit))
}

async fn get_availability(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> Result<Json<AvailabilitySnapshot>, AppError> {
    state
        .ledger
        .snapshot(unit_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError("unit not found".to_string()))
}

/// SSE stream of availability and booking changes for one unit, so every
/// viewer of its detail page sees the same counters without polling.
/// Best-effort: a lagging client drops events and re-fetches the snapshot
/// on reconnect.
async fn stream_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.feed.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.unit_id() == unit_id => {
                let name = match &event {
                    FeedEvent::Availability(_) => "availability",
                    FeedEvent::Booking { .. } => "booking",
                };
                let data = serde_json::to_string(&event).unwrap_or_default();
                Some(Ok(Event::default().event(name).data(data)))
            }
            _ => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
