//! Live event stream — SSE fan-out from the bus.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures_util::Stream;
use serde::Deserialize;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct EventsQuery {
    /// Drain the replay ring before live delivery. Defaults on so a
    /// late-joining UI sees recent history.
    #[serde(default = "default_replay")]
    pub replay: bool,
}

fn default_replay() -> bool {
    true
}

/// GET /events — one SSE line per bus event: `{type, data, timestamp}`.
/// Keepalives come from the bus itself after 30 s of silence.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.bus.subscribe(query.replay);

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let payload = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(payload));
        }
    };

    Sse::new(stream)
}
