//! Property tests for busy-window expiry and queue ordering.

mod fixtures;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::BTreeSet;
use std::sync::Arc;

use fixtures::Harness;
use supply_relay::{BusyGate, Delivery, ManualClock, QueuedEvent};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn gate() -> (Arc<ManualClock>, BusyGate) {
    let clock = Arc::new(ManualClock::default());
    let gate = BusyGate::with_clock(clock.clone());
    (clock, gate)
}

proptest! {
    #[test]
    fn busy_exactly_until_ttl_elapses(ttl in 1u64..10_000, elapsed in 0i64..20_000) {
        runtime().block_on(async {
            let (clock, gate) = gate();
            gate.set_busy(7, "flow", ttl).await;
            prop_assert!(gate.is_busy(7).await);

            clock.advance_secs(elapsed);
            let busy = gate.is_busy(7).await;
            prop_assert_eq!(busy, elapsed < ttl as i64);
            prop_assert_eq!(gate.record(7).await.is_some(), busy);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn second_set_busy_replaces_the_window(first in 1u64..1_000, second in 1u64..1_000) {
        runtime().block_on(async {
            let (clock, gate) = gate();
            gate.set_busy(7, "first", first).await;
            gate.set_busy(7, "second", second).await;

            let record = gate.record(7).await.unwrap();
            prop_assert_eq!(record.reason.as_str(), "second");

            clock.advance_secs(second as i64);
            prop_assert!(!gate.is_busy(7).await);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn clear_busy_returns_queue_in_enqueue_order(texts in prop::collection::vec("[a-z]{1,8}", 0..20)) {
        runtime().block_on(async {
            let (_clock, gate) = gate();
            gate.set_busy(1, "flow", 300).await;
            for text in &texts {
                gate.enqueue(1, QueuedEvent::broadcast(text.clone())).await;
            }

            let drained: Vec<String> = gate
                .clear_busy(1)
                .await
                .iter()
                .filter_map(|event| event.text("text").map(str::to_string))
                .collect();
            prop_assert_eq!(&drained, &texts);
            prop_assert!(gate.clear_busy(1).await.is_empty());
            prop_assert!(!gate.is_busy(1).await);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn expired_ids_is_exactly_the_elapsed_set(
        ttls in prop::collection::vec(1u64..100, 1..20),
        elapsed in 0i64..120,
    ) {
        runtime().block_on(async {
            let (clock, gate) = gate();
            for (subject, ttl) in ttls.iter().enumerate() {
                let subject = subject as i64;
                gate.set_busy(subject, "flow", *ttl).await;
                gate.enqueue(subject, QueuedEvent::broadcast("held")).await;
            }
            clock.advance_secs(elapsed);

            let expected: BTreeSet<i64> = ttls
                .iter()
                .enumerate()
                .filter(|(_, ttl)| **ttl as i64 <= elapsed)
                .map(|(subject, _)| subject as i64)
                .collect();
            let returned = gate.expired_ids().await;
            let got: BTreeSet<i64> = returned.iter().copied().collect();
            prop_assert_eq!(returned.len(), got.len());
            prop_assert_eq!(&got, &expected);

            for subject in &expected {
                prop_assert!(gate.record(*subject).await.is_none());
                prop_assert_eq!(gate.pending_len(*subject).await, 1);
            }
            prop_assert!(gate.expired_ids().await.is_empty());
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn queued_notifications_arrive_once_and_in_order(texts in prop::collection::vec("[a-z]{1,8}", 1..10)) {
        runtime().block_on(async {
            let h = Harness::new();
            h.relay.gate.set_busy(5, "flow", 300).await;
            for text in &texts {
                let delivery = h
                    .relay
                    .dispatcher
                    .notify(5, QueuedEvent::broadcast(text.clone()))
                    .await
                    .unwrap();
                prop_assert_eq!(delivery, Delivery::Queued);
            }
            prop_assert!(h.transport.for_subject(5).is_empty());

            let report = h.relay.dispatcher.flush(5).await;
            prop_assert_eq!(report.delivered, texts.len());

            let expected: Vec<String> = texts.iter().map(|text| format!("Broadcast:\n\n{text}")).collect();
            prop_assert_eq!(h.transport.texts_for(5), expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
