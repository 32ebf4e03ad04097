// Tests for fallback polling and reconciliation

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{assistant_message, fast_settings, user_message, FakeEngine, MemorySink};
use sessionrelay::monitor::registry::PartText;
use sessionrelay::monitor::{FallbackPoller, PollReport, SessionRegistry};
use sessionrelay::sink::Dispatcher;
use tokio::sync::watch;

fn setup() -> (Arc<FakeEngine>, Arc<MemorySink>, Arc<SessionRegistry>, FallbackPoller) {
    let engine = FakeEngine::new();
    let sink = MemorySink::new();
    let registry = Arc::new(SessionRegistry::new());
    let settings = fast_settings();
    let dispatcher = Arc::new(Dispatcher::new(sink.clone(), settings.delivery));
    let poller = FallbackPoller::new(
        engine.clone(),
        Arc::clone(&registry),
        dispatcher,
        settings.poll_interval,
    );
    (engine, sink, registry, poller)
}

#[tokio::test]
async fn test_delivers_completed_messages_oldest_first_once() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");
    engine.set_messages(
        "ses_1",
        vec![
            assistant_message("ses_1", "msg_c", 3, &["third"]),
            assistant_message("ses_1", "msg_a", 1, &["first"]),
            user_message("ses_1", "msg_u", 0, "the prompt"),
            assistant_message("ses_1", "msg_b", 2, &["second", "  ", "more"]),
        ],
    );

    let report = poller.poll_once().await;
    assert_eq!(
        report,
        PollReport {
            sessions_checked: 1,
            messages_delivered: 3,
            failures: 0,
        }
    );
    assert_eq!(sink.texts(), vec!["first", "second\nmore", "third"]);

    // Nothing new on the next cycle
    let report = poller.poll_once().await;
    assert_eq!(report.messages_delivered, 0);
    assert_eq!(sink.texts().len(), 3);
}

#[tokio::test]
async fn test_incomplete_messages_wait_for_completion() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");

    let mut running = assistant_message("ses_1", "msg_1", 1, &["thinking"]);
    running.info.time.completed = None;
    engine.set_messages("ses_1", vec![running.clone()]);

    poller.poll_once().await;
    assert!(sink.texts().is_empty());

    running.info.time.completed = Some(5);
    engine.set_messages("ses_1", vec![running]);
    poller.poll_once().await;
    assert_eq!(sink.texts(), vec!["thinking"]);
}

#[tokio::test]
async fn test_skips_text_already_streamed() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");

    // The feed got as far as the first line before it was given up on
    registry.append_partial("ses_1", "msg_1", "prt_0", PartText::Append("Hello\nWo"));
    registry.drain_complete_lines("ses_1", "msg_1");

    engine.set_messages(
        "ses_1",
        vec![assistant_message("ses_1", "msg_1", 1, &["Hello\nWorld"])],
    );
    poller.poll_once().await;

    assert_eq!(sink.texts(), vec!["World"]);
    assert!(registry.in_flight("ses_1").is_empty());
}

#[tokio::test]
async fn test_streamed_blank_part_does_not_shift_the_remainder() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");

    registry.append_partial("ses_1", "msg_1", "prt_0", PartText::Append("  \n"));
    registry.append_partial("ses_1", "msg_1", "prt_1", PartText::Append("Hel"));
    assert_eq!(registry.drain_complete_lines("ses_1", "msg_1"), None);

    engine.set_messages(
        "ses_1",
        vec![assistant_message("ses_1", "msg_1", 1, &["  \n", "Hello world"])],
    );
    poller.poll_once().await;

    assert_eq!(sink.texts(), vec!["Hello world"]);
}

#[tokio::test]
async fn test_multibyte_text_after_streamed_parts_is_not_lost() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");

    // Two parts streamed; the feed died after the first line of the second
    registry.append_partial("ses_1", "msg_1", "prt_0", PartText::Append("Résumé prêt"));
    registry.append_partial("ses_1", "msg_1", "prt_1", PartText::Append("  "));
    registry.append_partial("ses_1", "msg_1", "prt_2", PartText::Append("ééé done\nnä"));
    assert_eq!(
        registry.drain_complete_lines("ses_1", "msg_1").as_deref(),
        Some("Résumé prêt\nééé done\n")
    );
    assert_eq!(sink.texts().len(), 0);

    engine.set_messages(
        "ses_1",
        vec![assistant_message(
            "ses_1",
            "msg_1",
            1,
            &["Résumé prêt", "  ", "ééé done\nnäher dran"],
        )],
    );
    poller.poll_once().await;

    assert_eq!(sink.texts(), vec!["näher dran"]);
    assert!(registry.is_completed("ses_1", "msg_1"));
}

#[tokio::test]
async fn test_diverged_stream_resends_from_difference() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");

    registry.append_partial("ses_1", "msg_1", "prt_0", PartText::Append("draft line\n"));
    registry.drain_complete_lines("ses_1", "msg_1");

    engine.set_messages(
        "ses_1",
        vec![assistant_message("ses_1", "msg_1", 1, &["draft text\nfinal"])],
    );
    poller.poll_once().await;

    assert_eq!(sink.texts(), vec!["text\nfinal"]);
}

#[tokio::test]
async fn test_one_failing_session_does_not_block_others() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_bad", "thread_bad");
    registry.add("ses_good", "thread_good");
    engine.set_messages("ses_bad", vec![]);
    engine.set_messages(
        "ses_good",
        vec![assistant_message("ses_good", "msg_1", 1, &["fine"])],
    );
    engine.break_session("ses_bad");

    let report = poller.poll_once().await;

    assert_eq!(report.sessions_checked, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(sink.texts_for("thread_good"), vec!["fine"]);
    // Transient failures keep the session registered
    assert!(registry.contains("ses_bad"));
    assert!(registry.get("ses_bad").unwrap().last_checked.is_none());
    assert!(registry.get("ses_good").unwrap().last_checked.is_some());
}

#[tokio::test]
async fn test_vanished_session_is_deregistered() {
    let (_engine, _sink, registry, poller) = setup();
    registry.add("ses_gone", "thread_1");

    let report = poller.poll_once().await;

    assert_eq!(report.failures, 1);
    assert!(!registry.contains("ses_gone"));
}

#[tokio::test]
async fn test_vanished_destination_is_deregistered() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");
    engine.set_messages(
        "ses_1",
        vec![
            assistant_message("ses_1", "msg_1", 1, &["one"]),
            assistant_message("ses_1", "msg_2", 2, &["two"]),
        ],
    );
    sink.mark_gone("thread_1");

    poller.poll_once().await;

    assert!(!registry.contains("ses_1"));
    assert!(sink.texts().is_empty());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_polls_until_shutdown() {
    let (engine, sink, registry, poller) = setup();
    registry.add("ses_1", "thread_1");
    engine.set_messages("ses_1", vec![]);

    let (stop, mut shutdown) = watch::channel(false);
    let task = tokio::spawn(async move { poller.run(&mut shutdown).await });

    // First cycle runs right away, later ones on the interval
    assert!(common::eventually(|| engine.list_calls.load(Ordering::SeqCst) >= 2).await);

    engine.set_messages(
        "ses_1",
        vec![assistant_message("ses_1", "msg_1", 1, &["late arrival"])],
    );
    assert!(common::eventually(|| sink.texts() == vec!["late arrival"]).await);

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("poller should stop promptly")
        .unwrap();

    let calls = engine.list_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(engine.list_calls.load(Ordering::SeqCst), calls);
}
