use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::api::auth::require_owner;
use crate::api::AppState;
use crate::errors::ScanError;
use crate::models::{Identity, ScanRecord};
use crate::realtime::Subscription;

/// Server-sent events for one scan: the current record first, then every
/// committed update until the scan reaches a terminal state or the server
/// shuts down.
pub async fn scan_events(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ScanError> {
    let owner_id = require_owner(&identity)?;

    // Subscribe before reading so no update between the two is lost.
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = state.hub.subscribe_scan(&id, move |record| {
        let _ = tx.send(record.clone());
    });
    let current = state.db.get_owned_scan(owner_id, &id)?;
    debug!(scan_id = %id, version = current.version, "Event stream opened");

    let stream = record_stream(current, rx, subscription, state.shutdown.clone())
        .filter_map(|record| scan_event(&record).map(Ok));

    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}

/// Server-sent events for every scan the caller owns. Each event is a
/// committed record; list views refetch on receipt. Open until the client
/// disconnects or the server shuts down.
pub async fn owner_events(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ScanError> {
    let owner_id = require_owner(&identity)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = state.hub.subscribe_owner(owner_id, move |record| {
        let _ = tx.send(record.clone());
    });
    debug!(owner_id = %owner_id, "Owner event stream opened");

    let live = Live {
        rx,
        _subscription: subscription,
        shutdown: state.shutdown.clone(),
        scan_version: None,
        finished: false,
    };
    let stream = futures::stream::unfold(live, Live::next)
        .filter_map(|record| scan_event(&record).map(Ok));

    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}

struct Live {
    rx: mpsc::UnboundedReceiver<ScanRecord>,
    // Held for the stream's lifetime; dropping it unsubscribes.
    _subscription: Subscription,
    shutdown: CancellationToken,
    // Set for single-scan streams, which skip stale versions and end at a
    // terminal status.
    scan_version: Option<i64>,
    finished: bool,
}

impl Live {
    async fn next(mut self) -> Option<(ScanRecord, Self)> {
        if self.finished {
            return None;
        }
        loop {
            let record = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                record = self.rx.recv() => record?,
            };
            if let Some(last) = self.scan_version {
                if record.version <= last {
                    continue;
                }
                self.scan_version = Some(record.version);
                self.finished = record.status.is_terminal();
            }
            return Some((record, self));
        }
    }
}

fn record_stream(
    current: ScanRecord,
    rx: mpsc::UnboundedReceiver<ScanRecord>,
    subscription: Subscription,
    shutdown: CancellationToken,
) -> impl Stream<Item = ScanRecord> {
    let live = Live {
        rx,
        _subscription: subscription,
        shutdown,
        scan_version: Some(current.version),
        finished: current.status.is_terminal(),
    };
    let updates = futures::stream::unfold(live, Live::next);
    tokio_stream::iter(vec![current]).chain(updates)
}

fn scan_event(record: &ScanRecord) -> Option<Event> {
    Event::default()
        .event("scan")
        .id(record.version.to_string())
        .json_data(record)
        .map_err(|err| {
            warn!(scan_id = %record.id, "failed to encode scan event: {err}");
            err
        })
        .ok()
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}
