//! Catch-up behaviour: history first, then live, nothing lost or repeated.

mod common;

use chronicle_catchup::{
    CatchUpSubscription, InMemoryEventLog, Phase, Position, Slice, StartFrom, StreamRevision,
    SubscriptionSettings,
};
use common::*;
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn settings(batch: usize) -> SubscriptionSettings {
    SubscriptionSettings::default()
        .with_name("catch-up-test")
        .with_read_batch_size(batch)
}

// --- Stream subscriptions ---

#[test]
fn test_replays_history_then_goes_live() {
    init_tracing();
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(10)).unwrap();

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(log.stream("orders"), StartFrom::Beginning, settings(3), recorder)
            .unwrap();

    assert_eq!(until_live(&observed), revisions(0..10));
    assert!(eventually(|| subscription.phase() == Phase::Live));
    assert_eq!(subscription.last_processed_checkpoint(), Some(StreamRevision(9)));

    log.append("orders", events(5)).unwrap();
    assert_eq!(next_events(&observed, 5), revisions(10..15));

    subscription.stop(TIMEOUT).unwrap();
    let (rest, reason, error) = until_dropped(&observed);
    assert!(rest.is_empty());
    assert_eq!(reason, chronicle_catchup::DropReason::UserInitiated);
    assert!(error.is_none());
    assert_quiet(&observed);
}

#[test]
fn test_resume_after_checkpoint_is_exclusive() {
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(10)).unwrap();

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription = CatchUpSubscription::start(
        log.stream("orders"),
        StartFrom::Checkpoint(StreamRevision(4)),
        settings(4),
        recorder,
    )
    .unwrap();

    assert_eq!(until_live(&observed), revisions(5..10));
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_resume_from_end_goes_live_without_events() {
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(5)).unwrap();

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription = CatchUpSubscription::start(
        log.stream("orders"),
        StartFrom::Checkpoint(StreamRevision::END),
        settings(4),
        recorder,
    )
    .unwrap();

    assert!(until_live(&observed).is_empty());
    assert!(eventually(|| subscription.phase() == Phase::Live));
    assert_eq!(subscription.last_processed_checkpoint(), Some(StreamRevision::END));

    // Nothing can come after the end sentinel.
    log.append("orders", events(2)).unwrap();
    assert_quiet(&observed);
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_start_from_current_skips_history() {
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(5)).unwrap();

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(log.stream("orders"), StartFrom::Current, settings(10), recorder)
            .unwrap();

    assert!(until_live(&observed).is_empty());
    assert_eq!(subscription.last_processed_checkpoint(), Some(StreamRevision(4)));

    log.append("orders", events(2)).unwrap();
    assert_eq!(next_events(&observed, 2), revisions(5..7));
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_empty_stream_goes_live() {
    let log = Arc::new(InMemoryEventLog::new());

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(log.stream("orders"), StartFrom::Beginning, settings(10), recorder)
            .unwrap();

    assert!(until_live(&observed).is_empty());
    assert_eq!(subscription.last_processed_checkpoint(), None);

    log.append("orders", events(1)).unwrap();
    assert_eq!(next_events(&observed, 1), revisions(0..1));
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_appends_during_catch_up_delivered_once() {
    init_tracing();
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(100)).unwrap();

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription = CatchUpSubscription::start(
        log.stream("orders"),
        StartFrom::Beginning,
        settings(7).with_max_live_queue_size(16),
        recorder,
    )
    .unwrap();

    let writer = {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            for _ in 0..40 {
                log.append("orders", events(5)).unwrap();
            }
        })
    };

    let delivered = next_events(&observed, 300);
    writer.join().unwrap();
    assert_eq!(delivered, revisions(0..300));
    assert_quiet(&observed);

    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_link_events_resolved() {
    let log = Arc::new(InMemoryEventLog::new());
    log.append("order-1", events(2)).unwrap();
    log.append_link("$ce-order", "order-1", StreamRevision(0)).unwrap();
    log.append_link("$ce-order", "order-1", StreamRevision(1)).unwrap();

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription = CatchUpSubscription::start(
        log.stream("$ce-order"),
        StartFrom::Beginning,
        settings(10),
        recorder,
    )
    .unwrap();

    for expected in 0..2u64 {
        match observed.recv_timeout(TIMEOUT).unwrap() {
            Observed::Event(event) => {
                assert_eq!(event.checkpoint, StreamRevision(expected));
                assert_eq!(event.event.stream_id, "order-1");
                assert_eq!(event.event.revision, StreamRevision(expected));
                assert_eq!(event.original_stream_id(), "$ce-order");
            }
            other => panic!("expected an event, got {:?}", other),
        }
    }
    subscription.stop(TIMEOUT).unwrap();
}

// --- Whole-log subscriptions ---

#[test]
fn test_all_subscription_orders_by_position() {
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(3)).unwrap();
    log.append("invoices", events(3)).unwrap();

    let (recorder, observed) = Recorder::<Position>::new();
    let subscription =
        CatchUpSubscription::start(log.all(), StartFrom::Beginning, settings(2), recorder).unwrap();

    let history = until_live(&observed);
    assert_eq!(history.len(), 6);
    assert!(history.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(history.last().copied(), log.head_position());
    assert_eq!(subscription.target(), chronicle_catchup::ALL_STREAM);

    log.append("orders", events(1)).unwrap();
    let live = next_events(&observed, 1);
    assert_eq!(live.first().copied(), log.head_position());

    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_all_subscription_resumes_from_position() {
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(4)).unwrap();
    let resume = log.head_position().unwrap();
    log.append("invoices", events(2)).unwrap();

    let (recorder, observed) = Recorder::<Position>::new();
    let subscription = CatchUpSubscription::start(
        log.all(),
        StartFrom::Checkpoint(resume),
        settings(10),
        recorder,
    )
    .unwrap();

    let history = until_live(&observed);
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|position| *position > resume));
    subscription.stop(TIMEOUT).unwrap();
}

// --- Gap reconciliation ---

#[test]
fn test_gap_between_history_and_live_is_read() {
    init_tracing();
    let source = ScriptedSource::<StreamRevision>::new(
        |request| {
            Ok(match request.after.map(|r| r.0) {
                None => page(0..5, true),
                Some(4) => page(5..9, true),
                Some(after) => Slice::end(Some(StreamRevision(after))),
            })
        },
        |_, sink| {
            // Overlaps the gap read: 7 and 8 are also returned by history.
            for revision in 7..11 {
                assert!(sink.event_appeared(at(revision)));
            }
            opened(Some(StreamRevision(8)))
        },
    );

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(source.clone(), StartFrom::Beginning, settings(5), recorder)
            .unwrap();

    assert_eq!(next_events(&observed, 11), revisions(0..11));
    assert_quiet(&observed);

    let reads: Vec<_> = source.reads.lock().iter().map(|r| r.after).collect();
    assert_eq!(reads, vec![None, Some(StreamRevision(4))]);
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_gap_read_waits_for_log_to_catch_up() {
    let gap_reads = Arc::new(parking_lot::Mutex::new(0));
    let counter = Arc::clone(&gap_reads);
    let source = ScriptedSource::<StreamRevision>::new(
        move |request| {
            Ok(match request.after.map(|r| r.0) {
                None => page(0..3, true),
                Some(2) => {
                    let mut reads = counter.lock();
                    *reads += 1;
                    // The live feed is ahead of what reads can see at first.
                    if *reads < 3 {
                        Slice::end(Some(StreamRevision(2)))
                    } else {
                        page(3..6, true)
                    }
                }
                Some(after) => Slice::end(Some(StreamRevision(after))),
            })
        },
        |_, _| opened(Some(StreamRevision(5))),
    );

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(source, StartFrom::Beginning, settings(5), recorder).unwrap();

    assert_eq!(until_live(&observed), revisions(0..6));
    assert_eq!(*gap_reads.lock(), 3);
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_live_events_before_live_start_are_delivered_in_order() {
    let source = ScriptedSource::<StreamRevision>::new(
        |request| {
            Ok(match request.after {
                None => page(0..2, true),
                Some(after) => Slice::end(Some(after)),
            })
        },
        |_, sink| {
            for revision in 2..6 {
                sink.event_appeared(at(revision));
            }
            opened(Some(StreamRevision(1)))
        },
    );

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(source, StartFrom::Beginning, settings(5), recorder).unwrap();

    assert_eq!(next_events(&observed, 6), revisions(0..6));
    assert_quiet(&observed);
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_single_event_pages_with_early_live_arrivals() {
    let source = ScriptedSource::<StreamRevision>::new(
        |request| {
            let next = request.after.map_or(0, |after| after.0 + 1);
            Ok(if next > 9 {
                Slice::end(request.after)
            } else {
                page(next..next + 1, next == 9)
            })
        },
        |_, sink| {
            for revision in 10..20 {
                assert!(sink.event_appeared(at(revision)));
            }
            opened(Some(StreamRevision(9)))
        },
    );

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(source.clone(), StartFrom::Beginning, settings(1), recorder)
            .unwrap();

    let mut delivered = until_live(&observed);
    delivered.extend(next_events(&observed, 20 - delivered.len()));
    assert_eq!(delivered, revisions(0..20));

    let sink = source.last_sink().unwrap();
    for revision in 20..23 {
        assert!(sink.event_appeared(at(revision)));
    }
    assert_eq!(next_events(&observed, 3), revisions(20..23));
    assert_quiet(&observed);
    subscription.stop(TIMEOUT).unwrap();
}

#[test]
fn test_live_start_fires_once() {
    let log = Arc::new(InMemoryEventLog::new());
    log.append("orders", events(3)).unwrap();

    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let subscription =
        CatchUpSubscription::start(log.stream("orders"), StartFrom::Beginning, settings(1), recorder)
            .unwrap();

    until_live(&observed);
    for _ in 0..3 {
        log.append("orders", events(2)).unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    assert!(eventually(|| subscription.last_processed_checkpoint() == Some(StreamRevision(8))));
    subscription.stop(TIMEOUT).unwrap();

    let rest: Vec<_> = observed.try_iter().collect();
    let live_started = rest
        .iter()
        .filter(|o| matches!(o, Observed::LiveStarted))
        .count();
    assert_eq!(live_started, 0);
    assert!(matches!(
        rest.last(),
        Some(Observed::Dropped(chronicle_catchup::DropReason::UserInitiated, None))
    ));
}

// --- Backpressure ---

#[test]
fn test_full_live_queue_blocks_transport() {
    let source = ScriptedSource::<StreamRevision>::new(|_| Ok(Slice::end(None)), |_, _| opened(None));
    let (release, gate) = bounded::<()>(0);
    let (recorder, observed) = Recorder::<StreamRevision>::new();
    let recorder = recorder.with_hook(move |_, _| {
        let _ = gate.recv();
        Ok(())
    });
    let subscription = CatchUpSubscription::start(
        source.clone(),
        StartFrom::Beginning,
        settings(4).with_max_live_queue_size(2),
        recorder,
    )
    .unwrap();
    until_live(&observed);

    let sink = source.last_sink().unwrap();
    let (done_tx, done) = bounded(1);
    thread::spawn(move || {
        let pushed: Vec<bool> = (0..5).map(|revision| sink.event_appeared(at(revision))).collect();
        let _ = done_tx.send(pushed);
    });

    // One event held by the handler, two queued, the rest waiting.
    assert!(done.recv_timeout(Duration::from_millis(200)).is_err());

    drop(release);
    assert_eq!(done.recv_timeout(TIMEOUT).unwrap(), vec![true; 5]);
    assert_eq!(next_events(&observed, 5), revisions(0..5));
    subscription.stop(TIMEOUT).unwrap();
}
