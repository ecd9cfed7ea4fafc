//! Typed message-passing channels for a single-process, cooperatively
//! scheduled runtime.
//!
//! This crate provides the hard part of a channel library: a bounded
//! multi-producer multi-consumer queue ([`Anycast`]) where each message
//! goes to exactly one receiver, a fan-out channel ([`Broadcast`]) where
//! every live receiver sees every message through its own bounded buffer,
//! a fair multiplexer ([`select`]) and merger ([`merge`]) over any
//! heterogeneous set of receivers, and a drift-aware periodic [`Timer`].
//!
//! # Receivers
//!
//! Every source of messages in this crate — a channel half, a merged or
//! selected stream, a timer — implements the two-phase [`Receiver`]
//! trait: `ready()` suspends until something is available, `consume()`
//! retrieves it. The split exists so that [`select`] can await readiness
//! on several receivers at once and commit to exactly one of them without
//! racing, or stealing a message from, the others.
//!
//! # Closing
//!
//! Channels in this crate close only on an explicit `close()` call, never
//! implicitly when sender or receiver handles are dropped. Applications
//! that want drop-to-close semantics can call `close()` from their own
//! `Drop` impl around a handle.
//!
//! # Example
//!
//! ```
//! use asynctix::{Anycast, ReceiverExt};
//! use futures_executor::block_on;
//!
//! let channel = Anycast::<&str>::new("greetings", 4).unwrap();
//! let sender = channel.new_sender();
//! let receiver = channel.new_receiver();
//!
//! block_on(async move {
//!     sender.send("hello").await.unwrap();
//!     assert_eq!(receiver.receive().await.unwrap(), "hello");
//! });
//! ```
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

mod anycast;
mod broadcast;
mod error;
mod merge;
mod receiver;
mod select;
mod sleep;
mod timer;

pub use anycast::{Anycast, AnycastReceiver, AnycastSender};
pub use broadcast::{Broadcast, BroadcastReceiver, BroadcastSender, DEFAULT_RECEIVER_CAPACITY};
pub use error::{
    ChannelClosedError, CompositeError, ConsumeError, ReceiverStoppedError, SendError,
    TryConsumeError, TrySendError, UsageError,
};
pub use merge::{merge, MergedReceiver};
pub use receiver::{MapReceiver, Receiver, ReceiverExt, ReceiverStream};
pub use select::{select, selected_from, Select, Selected};
pub use timer::{
    MissedTickPolicy, SkipMissedAndDrift, SkipMissedAndResync, TickDecision, Timer,
    TriggerAllMissed,
};
