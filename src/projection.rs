//! Rebuilding aggregate state from stored events.

use crate::aggregate::Aggregate;
use crate::error::StoreError;
use crate::event::{StoredEvent, decode_domain_event};

/// Fold a sequence of domain events into aggregate state.
///
/// Starts from `A::default()` (the `NotStarted` stage), so an empty
/// sequence yields `NotStarted`.
///
/// # Arguments
///
/// * `events` - The events of one resource, in version order.
///
/// # Returns
///
/// The state after evolving through every event.
pub fn fold<'a, A, I>(events: I) -> A
where
    A: Aggregate,
    I: IntoIterator<Item = &'a A::Event>,
{
    events.into_iter().fold(A::default(), |state, event| state.evolve(event))
}

/// Decode stored rows into `A`'s event enum, preserving order.
///
/// Rows recorded for another resource type are skipped with a warning.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] for the first row of `A`'s type
/// whose tag or payload `A::Event` does not recognise. Folding around it
/// would decide against a state the log does not describe.
pub fn decode_events<A: Aggregate>(stored: &[StoredEvent]) -> Result<Vec<A::Event>, StoreError> {
    let mut events = Vec::with_capacity(stored.len());
    for row in stored {
        if row.resource_type != A::RESOURCE_TYPE {
            tracing::warn!(
                resource_id = %row.resource_id,
                expected = A::RESOURCE_TYPE,
                actual = %row.resource_type,
                "skipping event of another resource type"
            );
            continue;
        }
        let event = decode_domain_event::<A>(row).inspect_err(|e| {
            tracing::error!(
                resource_id = %row.resource_id,
                version = row.resource_version,
                event_type = %row.event_type,
                error = %e,
                "stored event cannot be decoded"
            );
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Decode and fold stored rows in one step.
///
/// # Errors
///
/// Fails as [`decode_events`] does.
pub fn project<A: Aggregate>(stored: &[StoredEvent]) -> Result<A, StoreError> {
    let events = decode_events::<A>(stored)?;
    Ok(fold::<A, _>(&events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Ticket, TicketEvent};
    use crate::event::{NewEvent, encode_domain_event};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn rows(resource_id: Uuid, events: &[TicketEvent]) -> Vec<StoredEvent> {
        events
            .iter()
            .enumerate()
            .map(|(i, e)| {
                encode_domain_event::<Ticket>(e)
                    .expect("encoding should succeed")
                    .into_stored(resource_id, "Ticket", i as u64 + 1)
            })
            .collect()
    }

    #[test]
    fn folding_nothing_yields_the_initial_state() {
        let state: Ticket = fold::<Ticket, _>(&[]);
        assert_eq!(state, Ticket::NotOpened);
    }

    #[test]
    fn fold_applies_events_in_order() {
        let events = vec![
            TicketEvent::Opened {
                opened_by: "ana".into(),
            },
            TicketEvent::NoteAdded { text: "a".into() },
            TicketEvent::NoteAdded { text: "b".into() },
        ];
        let state: Ticket = fold::<Ticket, _>(&events);
        assert_eq!(
            state,
            Ticket::Open {
                opened_by: "ana".into(),
                notes: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn excess_events_leave_state_unchanged() {
        let events = vec![
            TicketEvent::Opened {
                opened_by: "ana".into(),
            },
            TicketEvent::Closed,
            TicketEvent::NoteAdded {
                text: "too late".into(),
            },
        ];
        let state: Ticket = fold::<Ticket, _>(&events);
        assert_eq!(
            state,
            Ticket::Closed {
                opened_by: "ana".into()
            }
        );
    }

    #[test]
    fn project_decodes_then_folds() {
        let id = Uuid::new_v4();
        let stored = rows(
            id,
            &[
                TicketEvent::Opened {
                    opened_by: "ana".into(),
                },
                TicketEvent::Closed,
            ],
        );
        let state: Ticket = project(&stored).expect("projection should succeed");
        assert_eq!(
            state,
            Ticket::Closed {
                opened_by: "ana".into()
            }
        );
    }

    #[test]
    fn unknown_event_types_fail_to_decode() {
        let id = Uuid::new_v4();
        let mut stored = rows(
            id,
            &[TicketEvent::Opened {
                opened_by: "ana".into(),
            }],
        );
        stored.push(
            NewEvent {
                event_id: Uuid::new_v4(),
                event_type: "Escalated".into(),
                event_timestamp: Utc::now(),
                payload: json!({ "level": 2 }),
            }
            .into_stored(id, "Ticket", 2),
        );

        let err = decode_events::<Ticket>(&stored).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn malformed_payloads_fail_to_project() {
        let id = Uuid::new_v4();
        let stored = vec![
            NewEvent {
                event_id: Uuid::new_v4(),
                event_type: "Opened".into(),
                event_timestamp: Utc::now(),
                payload: json!({ "opened_by": 5 }),
            }
            .into_stored(id, "Ticket", 1),
        ];

        let err = project::<Ticket>(&stored).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn rows_of_other_resource_types_are_skipped() {
        let id = Uuid::new_v4();
        let mut stored = rows(id, &[TicketEvent::Closed]);
        stored[0].resource_type = "Comment".into();
        let decoded = decode_events::<Ticket>(&stored).expect("decoding should succeed");
        assert!(decoded.is_empty());
    }
}
