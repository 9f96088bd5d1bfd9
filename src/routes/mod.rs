pub mod drafts;
pub mod notifications;
pub mod packages;
pub mod public;
pub mod trips;

use std::{convert::Infallible, sync::Arc};

use axum::{
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    Router,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    auth,
    services::live::{LiveCollection, Snapshot},
    state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .merge(packages::page_router())
        .nest("/api/drafts", drafts::router())
        .nest("/api/trips", trips::router())
        .nest("/api/packages", packages::router())
        .merge(notifications::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::resolve_session,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Streams every published snapshot of a live collection. The stream holds
/// the collection, so its poll timer stops once the user's last client
/// disconnects.
pub(crate) fn live_events<S>(live: Arc<LiveCollection<S>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Snapshot,
    S::Item: Serialize,
{
    let rx = live.subscribe();
    let events = stream::unfold((live, rx, true), |(live, mut rx, first)| async move {
        if !first {
            rx.changed().await.ok()?;
        }
        let items = rx.borrow_and_update().clone();
        let event = Event::default()
            .event("snapshot")
            .json_data(&items)
            .unwrap_or_else(|_| Event::default().event("error"));
        Some((Ok(event), (live, rx, false)))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
