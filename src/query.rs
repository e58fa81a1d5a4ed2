//! Building blocks for read-side queries.
//!
//! A query is a pure function over events a caller has already fetched,
//! returning either a value or the aggregate's domain error. The async
//! helpers here only fetch and decode; they never decide anything.

use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::error::UnableToQuery;
use crate::event::{EventFilter, StoredEvent};
use crate::projection::decode_events;
use crate::store::EventStore;

/// Fetch and decode one resource's events.
///
/// # Errors
///
/// Returns [`UnableToQuery`] if the store cannot be read or a stored event
/// cannot be decoded.
pub async fn events_for<A: Aggregate>(
    store: &dyn EventStore,
    resource_id: Uuid,
) -> Result<Vec<A::Event>, UnableToQuery> {
    let stored = store.read(resource_id).await?;
    Ok(decode_events::<A>(&stored)?)
}

/// Fetch the events of every `A` resource matching `filter`.
///
/// The rows are returned undecoded so cross-resource queries can still see
/// which resource each event belongs to; see [`by_resource`].
///
/// # Errors
///
/// Returns [`UnableToQuery`] if the store cannot be read.
pub async fn events_matching<A: Aggregate>(
    store: &dyn EventStore,
    filter: &EventFilter,
) -> Result<Vec<StoredEvent>, UnableToQuery> {
    Ok(store.read_matching(A::RESOURCE_TYPE, filter).await?)
}

/// Narrow already-fetched rows with a filter, keeping their order.
pub fn filter_events<'a>(
    events: &'a [StoredEvent],
    filter: &'a EventFilter,
) -> impl Iterator<Item = &'a StoredEvent> + 'a {
    events.iter().filter(move |event| filter.matches(event))
}

/// The value extracted from the latest event `extract` recognises.
///
/// Events are expected in version order, so "latest" is the last match.
/// Returns `None` when no event matches.
///
/// # Examples
///
/// ```
/// use reviewfold::query::find_last;
///
/// let answers = ["yes", "skip", "no"];
/// let last = find_last(&answers[..], |a| (*a != "skip").then_some(*a));
/// assert_eq!(last, Some("no"));
/// ```
pub fn find_last<E, T>(events: &[E], extract: impl Fn(&E) -> Option<T>) -> Option<T> {
    events.iter().rev().find_map(extract)
}

/// Group decoded events by resource, keeping first-seen resource order and
/// per-resource version order.
///
/// Rows of other resource types are skipped as in
/// [`decode_events`](crate::projection::decode_events).
///
/// # Errors
///
/// Returns [`UnableToQuery`] if a row of `A`'s type cannot be decoded.
pub fn by_resource<A: Aggregate>(
    rows: &[StoredEvent],
) -> Result<Vec<(Uuid, Vec<A::Event>)>, UnableToQuery> {
    let mut grouped: Vec<(Uuid, Vec<A::Event>)> = Vec::new();
    for row in rows {
        let Some(event) = decode_events::<A>(std::slice::from_ref(row))?.pop() else {
            continue;
        };
        match grouped.iter_mut().find(|(id, _)| *id == row.resource_id) {
            Some((_, events)) => events.push(event),
            None => grouped.push((row.resource_id, vec![event])),
        }
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Ticket, TicketEvent};
    use crate::error::StoreError;
    use crate::event::encode_domain_event;
    use crate::store::InMemoryEventStore;
    use crate::store::test_fixtures::UnavailableStore;

    fn note(text: &str) -> TicketEvent {
        TicketEvent::NoteAdded { text: text.into() }
    }

    async fn seed(store: &InMemoryEventStore, id: Uuid, events: &[TicketEvent]) {
        let encoded = events
            .iter()
            .map(|e| encode_domain_event::<Ticket>(e).expect("encoding should succeed"))
            .collect();
        store
            .append(id, "Ticket", 0, encoded)
            .await
            .expect("append should succeed");
    }

    #[test]
    fn find_last_returns_the_latest_match() {
        let events = vec![note("a"), TicketEvent::Closed, note("b")];
        let last = find_last(events.as_slice(), |e| match e {
            TicketEvent::NoteAdded { text } => Some(text.clone()),
            _ => None,
        });
        assert_eq!(last.as_deref(), Some("b"));
    }

    #[test]
    fn find_last_without_match_is_none() {
        let events = vec![TicketEvent::Closed];
        let last = find_last(events.as_slice(), |e| match e {
            TicketEvent::NoteAdded { text } => Some(text.clone()),
            _ => None,
        });
        assert_eq!(last, None);
    }

    #[tokio::test]
    async fn events_for_decodes_one_stream() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        seed(&store, id, &[note("a"), note("b")]).await;

        let events = events_for::<Ticket>(&store, id)
            .await
            .expect("query should succeed");
        assert_eq!(events, vec![note("a"), note("b")]);
    }

    #[tokio::test]
    async fn store_failure_is_unable_to_query() {
        let err = events_for::<Ticket>(&UnavailableStore, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unable to query");
    }

    #[tokio::test]
    async fn undecodable_stored_event_is_unable_to_query() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        let corrupt = crate::event::NewEvent {
            event_id: Uuid::new_v4(),
            event_type: "NoteAdded".into(),
            event_timestamp: chrono::Utc::now(),
            payload: serde_json::json!({ "text": 5 }),
        };
        store
            .append(id, "Ticket", 0, vec![corrupt])
            .await
            .expect("append should succeed");

        let err = events_for::<Ticket>(&store, id).await.unwrap_err();
        assert!(matches!(err, UnableToQuery(StoreError::Serialization(_))));

        let rows = store.read(id).await.expect("read should succeed");
        assert!(by_resource::<Ticket>(&rows).is_err());
    }

    #[tokio::test]
    async fn matching_rows_group_by_resource() {
        let store = InMemoryEventStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        seed(&store, a, &[note("a1"), note("a2")]).await;
        seed(&store, b, &[note("b1")]).await;

        let rows = events_matching::<Ticket>(&store, &EventFilter::for_types(["NoteAdded"]))
            .await
            .expect("query should succeed");
        let grouped = by_resource::<Ticket>(&rows).expect("grouping should succeed");

        assert_eq!(
            grouped,
            vec![(a, vec![note("a1"), note("a2")]), (b, vec![note("b1")])]
        );
    }

    #[tokio::test]
    async fn filter_events_narrows_fetched_rows() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        seed(&store, id, &[note("a"), TicketEvent::Closed]).await;
        let rows = store.read(id).await.expect("read should succeed");

        let filter = EventFilter::for_types(["Closed"]);
        let closed: Vec<_> = filter_events(&rows, &filter).collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].resource_version, 2);
    }
}
