use std::sync::Arc;
use std::thread;
use std::time::Duration;

use asynctix::{select, selected_from, Anycast, Receiver, ReceiverExt, Timer};
use futures_executor::block_on;

fn sleep(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

#[derive(Debug, PartialEq)]
enum Event {
    Message(&'static str),
    Tick(Duration),
}

// A timer and an anycast receiver are selected together; the message
// arrives first, then the channel's terminal marker, then the timer
// keeps ticking indefinitely.
#[test]
fn timer_and_channel_selection() {
    let channel = Anycast::<&'static str>::new("a", 1).unwrap();
    let sender = channel.new_sender();
    let channel2 = channel.clone();

    thread::spawn(move || {
        sleep(300);
        block_on(sender.send("hello")).unwrap();
        sleep(100);
        channel2.close();
    });

    let timer = Timer::periodic(Duration::from_millis(500)).unwrap();
    let message_source: Arc<dyn Receiver<Event>> =
        Arc::new(channel.new_receiver().map(Event::Message));
    let tick_source: Arc<dyn Receiver<Event>> = Arc::new(timer.map(Event::Tick));
    let selector = select(vec![message_source.clone(), tick_source]).unwrap();

    block_on(async {
        let first = selector.next().await.unwrap();
        assert!(selected_from(&first, &message_source));
        assert_eq!(first.message(), Some(Event::Message("hello")));

        let second = selector.next().await.unwrap();
        assert!(selected_from(&second, &message_source));
        assert!(second.was_stopped());

        for _ in 0..3 {
            let tick = selector.next().await.unwrap();
            assert!(matches!(tick.message(), Some(Event::Tick(_))));
        }
    });
}

// With two always-ready inputs, the round-robin rotor keeps both inputs
// selected roughly equally often.
#[test]
fn fairness_between_two_hot_inputs() {
    let c1 = Anycast::<u32>::new("r1", 64).unwrap();
    let c2 = Anycast::<u32>::new("r2", 64).unwrap();
    let s1 = c1.new_sender();
    let s2 = c2.new_sender();

    const N: usize = 200;
    for i in 0..N as u32 {
        s1.try_send(i).unwrap();
        s2.try_send(i).unwrap();
    }

    let r1: Arc<dyn Receiver<u32>> = Arc::new(c1.new_receiver());
    let r2: Arc<dyn Receiver<u32>> = Arc::new(c2.new_receiver());
    let selector = select(vec![r1.clone(), r2.clone()]).unwrap();

    let mut count_r1 = 0usize;
    let mut count_r2 = 0usize;
    block_on(async {
        for _ in 0..2 * N {
            let selected = selector.next().await.unwrap();
            if selected_from(&selected, &r1) {
                count_r1 += 1;
            } else {
                count_r2 += 1;
            }
        }
    });

    assert!((count_r1 as i64 - count_r2 as i64).abs() <= 1);
}

// Dropping the selector mid-iteration does not consume the message held
// by a losing probe: the input itself still yields it afterwards.
#[test]
fn abandoning_select_does_not_steal_from_losing_probes() {
    let c1 = Anycast::<u32>::new("r1", 4).unwrap();
    let c2 = Anycast::<u32>::new("r2", 4).unwrap();
    let s1 = c1.new_sender();
    let s2 = c2.new_sender();
    s1.try_send(1).unwrap();
    s2.try_send(2).unwrap();

    let r1: Arc<dyn Receiver<u32>> = Arc::new(c1.new_receiver());
    let r2: Arc<dyn Receiver<u32>> = Arc::new(c2.new_receiver());
    let r2_kept = r2.clone();

    {
        let selector = select(vec![r1.clone(), r2]).unwrap();
        let selected = block_on(selector.next()).unwrap();
        // Both inputs were ready; the rotor starts at index 0, so `r1` is
        // chosen first. `r2`'s probe resolved in the same poll and is now
        // holding its message, unconsumed.
        assert!(selected_from(&selected, &r1));
        assert_eq!(selected.message(), Some(1));
        // `selector` is dropped here, mid-loop.
    }

    assert_eq!(block_on(r2_kept.receive()).unwrap(), 2);
}

#[test]
fn zero_inputs_is_a_usage_error() {
    let inputs: Vec<Arc<dyn Receiver<i32>>> = Vec::new();
    assert!(select(inputs).is_err());
}
