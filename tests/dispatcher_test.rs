// Tests for chunked delivery with retries and timeouts

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::MemorySink;
use sessionrelay::sink::{DeliveryOutcome, DeliveryPolicy, Dispatcher};

fn policy(max_message_len: usize) -> DeliveryPolicy {
    DeliveryPolicy {
        max_message_len,
        timeout: Duration::from_millis(100),
        retries: 1,
    }
}

#[tokio::test]
async fn test_long_text_is_sent_as_ordered_fragments() {
    let sink = MemorySink::new();
    let dispatcher = Dispatcher::new(sink.clone(), policy(10));

    let outcome = dispatcher.deliver("thread_1", "aaaa\nbbbb\ncccc").await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(sink.texts_for("thread_1"), vec!["aaaa\nbbbb", "cccc"]);
}

#[tokio::test]
async fn test_blank_text_sends_nothing() {
    let sink = MemorySink::new();
    let dispatcher = Dispatcher::new(sink.clone(), policy(2000));

    assert_eq!(dispatcher.deliver("thread_1", "  \n").await, DeliveryOutcome::Delivered);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_fragments_are_not_sent() {
    let sink = MemorySink::new();
    let dispatcher = Dispatcher::new(sink.clone(), policy(1));

    let outcome = dispatcher.deliver("thread_1", "a\n\nb").await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(sink.texts(), vec!["a", "b"]);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let sink = MemorySink::new();
    sink.failures_left.store(1, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(sink.clone(), policy(2000));

    let outcome = dispatcher.deliver("thread_1", "hello").await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(sink.texts(), vec!["hello"]);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_persistent_failure_drops_fragment_and_continues() {
    let sink = MemorySink::new();
    sink.failures_left.store(2, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(sink.clone(), policy(4));

    let outcome = dispatcher.deliver("thread_1", "lost\nkept").await;

    assert_eq!(outcome, DeliveryOutcome::Dropped);
    assert_eq!(sink.texts(), vec!["kept"]);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_slow_sink_times_out() {
    let sink = MemorySink::new();
    *sink.delay.lock().unwrap() = Some(Duration::from_secs(5));
    let dispatcher = Dispatcher::new(sink.clone(), policy(2000));

    let started = std::time::Instant::now();
    let outcome = dispatcher.deliver("thread_1", "slow").await;

    assert_eq!(outcome, DeliveryOutcome::Dropped);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_vanished_destination_stops_delivery() {
    let sink = MemorySink::new();
    sink.mark_gone("thread_1");
    let dispatcher = Dispatcher::new(sink.clone(), policy(4));

    let outcome = dispatcher.deliver("thread_1", "one\ntwo\nsix").await;

    assert_eq!(outcome, DeliveryOutcome::DestinationGone);
    // Not found is never retried
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}
