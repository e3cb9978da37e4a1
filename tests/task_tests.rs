//! Streaming tasks driven through pads and the stream lock.

use padflow::buffer::Buffer;
use padflow::element::{Pad, PadDirection};
use padflow::flow::FlowSuccess;
use padflow::task::{StreamLock, Task, TaskError, TaskState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

fn linked_pair() -> (Pad, Pad, Arc<AtomicUsize>) {
    let src = Pad::new("src", PadDirection::Src);
    let sink = Pad::new("sink", PadDirection::Sink);
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    sink.set_chain_function(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(FlowSuccess::Ok)
    });
    src.link(&sink).unwrap();
    src.set_active(true);
    sink.set_active(true);
    (src, sink, received)
}

#[test]
fn test_pad_task_pushes_until_paused() {
    let (src, _sink, received) = linked_pair();
    let pusher = src.clone();
    assert!(src.start_task(move || {
        let _ = pusher.push(Buffer::with_size(4));
        std::thread::yield_now();
    }));
    assert!(wait_for(|| received.load(Ordering::SeqCst) >= 10));

    assert!(src.pause_task());
    assert_eq!(src.task_state(), Some(TaskState::Paused));
    let frozen = received.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(received.load(Ordering::SeqCst), frozen);

    // Restart keeps the original function.
    assert!(src.start_task(|| {}));
    assert!(wait_for(|| received.load(Ordering::SeqCst) > frozen));

    assert!(src.stop_task());
    assert_eq!(src.task_state(), None);
}

#[test]
fn test_holding_stream_lock_blocks_iterations() {
    let (src, _sink, received) = linked_pair();
    let lock = src.stream_lock();
    let guard = lock.lock();

    let pusher = src.clone();
    assert!(src.start_task(move || {
        let _ = pusher.push(Buffer::with_size(1));
    }));
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(received.load(Ordering::SeqCst), 0);

    drop(guard);
    assert!(wait_for(|| received.load(Ordering::SeqCst) > 0));
    assert!(src.stop_task());
}

#[test]
fn test_task_stops_itself() {
    let (src, _sink, received) = linked_pair();
    let pusher = src.clone();
    let mut left = 5;
    assert!(src.start_task(move || {
        if left == 0 {
            pusher.pause_task();
            return;
        }
        left -= 1;
        let _ = pusher.push(Buffer::with_size(1));
    }));
    assert!(wait_for(|| src.task_state() == Some(TaskState::Paused)));
    assert_eq!(received.load(Ordering::SeqCst), 5);
    assert!(src.stop_task());
}

#[test]
fn test_shared_lock_between_tasks() {
    let lock = StreamLock::default();
    let inside = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let rounds = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Task> = (0..2)
        .map(|i| {
            let (inside, overlaps, rounds) = (inside.clone(), overlaps.clone(), rounds.clone());
            let task = Task::new(format!("worker-{i}"), move || {
                if inside.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::yield_now();
                inside.store(false, Ordering::SeqCst);
                rounds.fetch_add(1, Ordering::SeqCst);
            });
            task.set_lock(lock.clone()).unwrap();
            task
        })
        .collect();

    for task in &tasks {
        task.start().unwrap();
    }
    assert!(wait_for(|| rounds.load(Ordering::SeqCst) >= 200));
    for task in &tasks {
        task.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_usage_errors() {
    let task = Task::new("t", || std::thread::sleep(Duration::from_millis(1)));
    assert!(matches!(task.pause(), Err(TaskError::NoLock(_))));

    task.set_lock(StreamLock::default()).unwrap();
    task.start().unwrap();
    assert!(matches!(
        task.set_lock(StreamLock::default()),
        Err(TaskError::LockAlreadySet(_))
    ));
    task.join().unwrap();
    assert_eq!(task.state(), TaskState::Stopped);
    task.set_lock(StreamLock::default()).unwrap();
}
