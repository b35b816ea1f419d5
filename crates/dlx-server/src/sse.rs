//! Server-Sent-Events endpoint. Coalesces bursts of upserts per download id
//! into a single outgoing frame over a short window; the notifier itself
//! only guarantees delivery-or-drop.

use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use dlx_core::store::ChangeEvent;
use futures::stream::Stream;
use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

const COALESCE_WINDOW: Duration = Duration::from_millis(150);

pub async fn stream_downloads(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (mut rx, _unsub) = state.store.subscribe_changes(256);

    let stream = async_stream::stream! {
        let _unsub = _unsub;
        loop {
            let Some(first) = rx.recv().await else { return; };
            let mut pending: HashMap<i64, ChangeEvent> = HashMap::new();
            insert(&mut pending, first);

            let deadline = tokio::time::sleep(COALESCE_WINDOW);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    maybe_event = rx.recv() => {
                        match maybe_event {
                            Some(event) => insert(&mut pending, event),
                            None => {
                                for event in pending.into_values() {
                                    yield Ok(to_sse_event(event));
                                }
                                return;
                            }
                        }
                    }
                }
            }

            for event in pending.into_values() {
                yield Ok(to_sse_event(event));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn insert(pending: &mut HashMap<i64, ChangeEvent>, event: ChangeEvent) {
    let key = match &event {
        ChangeEvent::Upsert(record) => record.id,
        ChangeEvent::Delete(id) => *id,
    };
    pending.insert(key, event);
}

fn to_sse_event(event: ChangeEvent) -> Event {
    match event {
        ChangeEvent::Upsert(record) => Event::default()
            .event("upsert")
            .json_data(record)
            .unwrap_or_else(|_| Event::default().event("upsert")),
        ChangeEvent::Delete(id) => Event::default()
            .event("delete")
            .data(id.to_string()),
    }
}
