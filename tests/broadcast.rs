use std::thread;
use std::time::Duration;

use asynctix::{Broadcast, ReceiverExt};
use futures_executor::block_on;

fn sleep(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

// A receiver created after some sends, with `resend_latest`, observes
// the latest prior send before anything new.
#[test]
fn latest_replay() {
    let channel = Broadcast::new("b", true);
    let sender = channel.new_sender();

    sender.try_send(1).unwrap();
    sender.try_send(2).unwrap();
    sender.try_send(3).unwrap();

    let receiver = channel.new_named_receiver("late", 2).unwrap();
    sender.try_send(4).unwrap();

    block_on(async {
        assert_eq!(receiver.receive().await.unwrap(), 3);
        assert_eq!(receiver.receive().await.unwrap(), 4);
    });
}

// Without `resend_latest`, a new receiver only observes sends that occur
// after its creation.
#[test]
fn no_replay_without_flag() {
    let channel = Broadcast::new("b", false);
    let sender = channel.new_sender();

    sender.try_send(1).unwrap();
    let receiver = channel.new_receiver();
    sender.try_send(2).unwrap();

    assert_eq!(block_on(receiver.receive()).unwrap(), 2);
}

// A fast and a slow receiver diverge: the slow one is lossy but stays in
// order and always ends on the last sent value.
#[test]
fn lossy_overflow_keeps_order_and_latest() {
    let channel = Broadcast::<u32>::new("b", false);
    let sender = channel.new_sender();
    let fast = channel.new_named_receiver("fast", 10).unwrap();
    let slow = channel.new_named_receiver("slow", 1).unwrap();

    for i in 1..=100u32 {
        sender.try_send(i).unwrap();
    }

    let mut fast_seen = Vec::new();
    block_on(async {
        while let Ok(v) = fast.try_consume() {
            fast_seen.push(v);
        }
    });
    assert_eq!(fast_seen, (1..=100).collect::<Vec<_>>());

    let mut slow_seen = Vec::new();
    while let Ok(v) = slow.try_consume() {
        slow_seen.push(v);
    }
    assert!(!slow_seen.is_empty());
    assert!(slow_seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*slow_seen.last().unwrap(), 100);
}

// Dropping receivers without closing them frees their records; the
// sender path only ever iterates over still-live receivers.
#[test]
fn receiver_garbage_collection() {
    let channel = Broadcast::<i32>::new("b", false);
    let sender = channel.new_sender();

    for _ in 0..50 {
        let r = channel.new_receiver();
        drop(r);
    }

    let kept = channel.new_receiver();
    sender.try_send(1).unwrap();

    assert_eq!(channel.receiver_count(), 1);
    assert_eq!(block_on(kept.receive()).unwrap(), 1);
}

#[test]
fn wait_for_receiver_times_out() {
    let channel = Broadcast::<i32>::new("b", false);
    assert!(!block_on(channel.wait_for_receiver(1, Some(Duration::from_millis(50)))));
}

#[test]
fn wait_for_receiver_unblocks_on_registration() {
    let channel = Broadcast::<i32>::new("b", false);
    let channel2 = channel.clone();

    let th = thread::spawn(move || block_on(channel2.wait_for_receiver(1, None)));

    sleep(50);
    let _receiver = channel.new_receiver();

    assert!(th.join().unwrap());
}

#[test]
fn zero_capacity_receiver_is_a_usage_error() {
    let channel = Broadcast::<i32>::new("b", false);
    assert!(channel.new_named_receiver("r", 0).is_err());
}

// Closing wakes every live receiver, which then reports termination
// exactly once and keeps reporting it.
#[test]
fn close_wakes_every_receiver() {
    let channel = Broadcast::<i32>::new("b", false);
    let r1 = channel.new_receiver();
    let r2 = channel.new_receiver();
    let channel2 = channel.clone();

    let th1 = thread::spawn(move || block_on(r1.receive()));
    let th2 = thread::spawn(move || block_on(r2.receive()));

    sleep(100);
    channel2.close();

    assert!(th1.join().unwrap().is_err());
    assert!(th2.join().unwrap().is_err());
}
