use std::sync::Arc;

use asynctix::{merge, Anycast, Receiver, ReceiverExt};
use futures_executor::block_on;

// Two inputs, each producing one message at the same time, are both
// delivered through the merged receiver without loss.
#[test]
fn interleaves_without_losing_either_input() {
    let c1 = Anycast::new("r1", 1).unwrap();
    let c2 = Anycast::new("r2", 1).unwrap();
    let s1 = c1.new_sender();
    let s2 = c2.new_sender();

    let r1: Arc<dyn Receiver<&str>> = Arc::new(c1.new_receiver());
    let r2: Arc<dyn Receiver<&str>> = Arc::new(c2.new_receiver());
    let merged = merge(vec![r1, r2]).unwrap();

    block_on(async {
        s1.send("A").await.unwrap();
        s2.send("B").await.unwrap();

        let mut got = vec![merged.receive().await.unwrap(), merged.receive().await.unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec!["A", "B"]);
    });
}

// A single input's relative order survives merging.
#[test]
fn preserves_per_input_order() {
    let c1 = Anycast::new("r1", 8).unwrap();
    let c2 = Anycast::new("r2", 8).unwrap();
    let s1 = c1.new_sender();

    let r1: Arc<dyn Receiver<u32>> = Arc::new(c1.new_receiver());
    let r2: Arc<dyn Receiver<u32>> = Arc::new(c2.new_receiver());
    let merged = merge(vec![r1, r2]).unwrap();

    block_on(async {
        for i in 0..10 {
            s1.send(i).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(merged.receive().await.unwrap(), i);
        }
    });
}

// Merge terminates only once every input has terminated; a single input
// closing early is absorbed silently, and messages already sent before
// the close are still delivered.
#[test]
fn terminates_once_every_input_is_done() {
    let c1 = Anycast::<u32>::new("r1", 4).unwrap();
    let c2 = Anycast::<u32>::new("r2", 4).unwrap();
    let s1 = c1.new_sender();
    let s2 = c2.new_sender();

    let r1: Arc<dyn Receiver<u32>> = Arc::new(c1.new_receiver());
    let r2: Arc<dyn Receiver<u32>> = Arc::new(c2.new_receiver());
    let merged = merge(vec![r1, r2]).unwrap();

    block_on(async {
        s1.send(1).await.unwrap();
        c1.close();
        s2.send(2).await.unwrap();

        let mut got = vec![merged.receive().await.unwrap(), merged.receive().await.unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![1, 2]);

        c2.close();
        assert!(merged.receive().await.is_err());
    });
}

#[test]
fn zero_inputs_is_a_usage_error() {
    let inputs: Vec<Arc<dyn Receiver<i32>>> = Vec::new();
    assert!(merge(inputs).is_err());
}
