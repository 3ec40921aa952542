//! TTS queue integration tests
//!
//! Exercise ordering, draining and cancellation with a simulated sink

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_voice::voice::{AudioChunk, AudioSink, QueueState, TtsQueue};

mod common;

use common::RecordingSink;

fn queue_over(sink: &Arc<RecordingSink>) -> TtsQueue {
    let sink: Arc<dyn AudioSink> = sink.clone();
    TtsQueue::new(sink)
}

#[test]
fn test_chunks_play_in_push_order() {
    let sink = RecordingSink::new(Duration::from_millis(5));
    let queue = queue_over(&sink);

    for marker in 1..=5 {
        queue.push(AudioChunk::new(vec![marker; 64], 16_000));
    }
    queue.finish();
    assert!(queue.wait_idle(Some(Duration::from_secs(2))));

    let firsts: Vec<i16> = sink.calls().iter().map(|c| c.first).collect();
    assert_eq!(firsts, vec![1, 2, 3, 4, 5]);
    assert_eq!(sink.max_active(), 1);
}

#[test]
fn test_drains_three_sentences() {
    let sink = RecordingSink::new(Duration::from_millis(20));
    let queue = queue_over(&sink);

    for _ in 0..3 {
        queue.push(AudioChunk::new(vec![100; 11_025], 22_050));
    }
    queue.finish();
    assert!(queue.wait_idle(Some(Duration::from_secs(2))));

    assert_eq!(sink.call_count(), 3);
    assert_eq!(sink.total_samples(), 33_075);
    assert!(sink.calls().iter().all(|c| c.sample_rate == 22_050));
    assert!(!queue.is_active());
    assert_eq!(queue.state(), QueueState::Stopped);
    assert_eq!(queue.played(), 3);
}

#[test]
fn test_cancel_mid_playback_stops_sink_calls() {
    let sink = RecordingSink::new(Duration::from_millis(100));
    let queue = queue_over(&sink);

    for _ in 0..10 {
        queue.push(AudioChunk::new(vec![100; 1024], 22_050));
    }
    queue.finish();

    std::thread::sleep(Duration::from_millis(250));
    queue.cancel();

    let after_cancel = sink.call_count();
    assert!(after_cancel < 10, "{after_cancel} calls");
    assert_eq!(sink.active(), 0);
    assert_eq!(queue.pending(), 0);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(sink.call_count(), after_cancel);
    assert!(!queue.is_active());
}

#[test]
fn test_push_never_waits_for_playback() {
    let sink = RecordingSink::new(Duration::from_millis(200));
    let queue = queue_over(&sink);

    let started = Instant::now();
    for _ in 0..5 {
        queue.push(AudioChunk::new(vec![100; 256], 16_000));
    }
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(queue.is_active());

    queue.cancel();
}

#[test]
fn test_cancel_is_bounded_when_sink_ignores_token() {
    let sink = RecordingSink::stubborn(Duration::from_millis(800));
    let shared: Arc<dyn AudioSink> = sink.clone();
    let queue = TtsQueue::with_cancel_timeout(shared, Duration::from_millis(100));

    queue.push(AudioChunk::new(vec![100; 256], 16_000));
    assert!(common::wait_until(Duration::from_secs(1), || sink.active() == 1));

    let started = Instant::now();
    queue.cancel();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(queue.is_cancelled());
}

#[test]
fn test_push_after_cancel_is_dropped() {
    let sink = RecordingSink::new(Duration::ZERO);
    let queue = queue_over(&sink);

    queue.push(AudioChunk::new(vec![1; 8], 16_000));
    queue.cancel();
    queue.push(AudioChunk::new(vec![2; 8], 16_000));

    assert_eq!(queue.pending(), 0);
    assert!(sink.calls().iter().all(|c| c.first == 1));
}

#[test]
fn test_drop_joins_consumer() {
    let sink = RecordingSink::new(Duration::from_millis(50));
    {
        let queue = queue_over(&sink);
        for _ in 0..4 {
            queue.push(AudioChunk::new(vec![100; 256], 16_000));
        }
    }
    assert_eq!(sink.active(), 0);
    let count = sink.call_count();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.call_count(), count);
}

#[test]
fn test_finish_and_cancel_after_finish_are_harmless() {
    let sink = RecordingSink::new(Duration::from_millis(10));
    let queue = queue_over(&sink);

    for marker in 1..=3 {
        queue.push(AudioChunk::new(vec![marker; 64], 16_000));
    }
    queue.finish();
    queue.finish();
    assert!(queue.wait_idle(Some(Duration::from_secs(2))));
    assert_eq!(queue.state(), QueueState::Stopped);

    // Finish after drain, then cancel after finish
    queue.finish();
    queue.cancel();
    queue.push(AudioChunk::new(vec![9; 64], 16_000));

    assert!(queue.is_cancelled());
    assert_eq!(queue.state(), QueueState::Stopped);
    assert_eq!(queue.pending(), 0);
    let firsts: Vec<i16> = sink.calls().iter().map(|c| c.first).collect();
    assert_eq!(firsts, vec![1, 2, 3]);
    assert!(sink.calls().iter().all(|c| !c.cancelled));
}

#[test]
fn test_cancel_while_draining_stops_remaining_chunks() {
    let sink = RecordingSink::new(Duration::from_millis(100));
    let queue = queue_over(&sink);

    for marker in 1..=5 {
        queue.push(AudioChunk::new(vec![marker; 64], 16_000));
    }
    queue.finish();
    assert!(common::wait_until(Duration::from_secs(1), || sink.active() == 1));
    queue.cancel();

    assert_eq!(queue.state(), QueueState::Stopped);
    assert!(queue.wait_idle(Some(Duration::from_millis(100))));
    let count = sink.call_count();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(sink.call_count(), count);
    assert!(count < 5);
}
