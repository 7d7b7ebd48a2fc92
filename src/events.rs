// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Waiting on event streams.

use futures_util::{Stream, StreamExt};

/// Consume `events` until one satisfies `predicate` and return it.
///
/// The stream is dropped on return, which ends the underlying subscription.
/// Returns `None` if the stream ends first.
pub async fn wait_until<S, T, F>(events: S, mut predicate: F) -> Option<T>
where
    S: Stream<Item = T>,
    F: FnMut(&T) -> bool,
{
    let mut events = Box::pin(events);
    while let Some(event) = events.next().await {
        if predicate(&event) {
            return Some(event);
        }
    }
    None
}
