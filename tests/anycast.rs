use std::collections::HashSet;
use std::future::Future;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use asynctix::{Anycast, ReceiverExt, TryConsumeError, TrySendError};
use futures_executor::block_on;
use futures_task::noop_waker;
use futures_util::pin_mut;

fn sleep(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

// Polls a future once, then keeps it alive for a while before dropping it,
// so a cancellation race has time to manifest.
fn poll_once_and_keep_alive<F: Future>(f: F, millis: u64) -> Poll<F::Output> {
    pin_mut!(f);
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let res = f.poll(&mut cx);
    sleep(millis);
    res
}

// Three sends observed in order by a single receiver.
#[test]
fn fifo_single_receiver() {
    let channel = Anycast::new("a", 2).unwrap();
    let sender = channel.new_sender();
    let receiver = channel.new_receiver();

    block_on(async {
        sender.send("x").await.unwrap();
        sender.send("y").await.unwrap();
        sender.send("z").await.unwrap();

        assert_eq!(receiver.receive().await.unwrap(), "x");
        assert_eq!(receiver.receive().await.unwrap(), "y");
        assert_eq!(receiver.receive().await.unwrap(), "z");
    });
}

// Every message is observed by exactly one of several peer receivers.
#[test]
fn exactly_once_across_peers() {
    const COUNT: usize = 500;

    let channel = Anycast::new("a", 8).unwrap();
    let sender = channel.new_sender();

    let th_send = thread::spawn(move || {
        block_on(async {
            for i in 0..COUNT {
                sender.send(i).await.unwrap();
            }
            sender.close();
        });
    });

    let receivers: Vec<_> = (0..4).map(|_| channel.new_receiver()).collect();
    let th_recv: Vec<_> = receivers
        .into_iter()
        .map(|r| {
            thread::spawn(move || {
                let mut seen = Vec::new();
                block_on(async {
                    while let Ok(value) = r.receive().await {
                        seen.push(value);
                    }
                });
                seen
            })
        })
        .collect();

    th_send.join().unwrap();

    let mut all: Vec<usize> = th_recv.into_iter().flat_map(|t| t.join().unwrap()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..COUNT).collect::<Vec<_>>());

    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(unique.len(), COUNT);
}

// With no consumer, the buffer never grows past its limit and excess
// senders are suspended.
#[test]
fn backpressure() {
    let channel = Anycast::new("a", 2).unwrap();
    let sender = channel.new_sender();

    assert_eq!(sender.try_send(1), Ok(()));
    assert_eq!(sender.try_send(2), Ok(()));
    assert_eq!(sender.try_send(3), Err(TrySendError::Full(3)));
    assert_eq!(channel.len(), 2);

    let sender2 = channel.new_sender();
    let th_blocked = thread::spawn(move || {
        block_on(sender2.send(3)).unwrap(); // blocked until a slot frees up
    });

    sleep(100);
    assert_eq!(channel.len(), 2);

    let receiver = channel.new_receiver();
    assert_eq!(block_on(receiver.receive()).unwrap(), 1);

    th_blocked.join().unwrap();
    assert_eq!(channel.len(), 2);
}

// Closing wakes a receiver blocked on an empty channel, and every
// subsequent operation keeps reporting termination.
#[test]
fn close_wakes_blocked_receiver() {
    let channel = Anycast::<i32>::new("a", 4).unwrap();
    let receiver = channel.new_receiver();
    let channel2 = channel.clone();

    let th_recv = thread::spawn(move || block_on(receiver.receive()));

    sleep(100);
    channel2.close();

    assert!(th_recv.join().unwrap().is_err());
    assert!(channel2.is_closed());
}

#[test]
fn try_consume_reports_empty_then_closed() {
    let channel = Anycast::<i32>::new("a", 2).unwrap();
    let receiver = channel.new_receiver();

    assert_eq!(receiver.try_consume(), Err(TryConsumeError::Empty));
    channel.close();
    assert_eq!(receiver.try_consume(), Err(TryConsumeError::Closed));
}

#[test]
fn zero_capacity_is_a_usage_error() {
    assert!(Anycast::<i32>::new("a", 0).is_err());
}
