//! # Live queries
//!
//! - **Change bus**: synchronous fan-out of ingested documents
//! - **Wait-for**: races poll, listener, timeout and close arms behind a
//!   write-once latch
//! - **Subscriptions**: long-lived listeners forwarding matches to a push
//!   delivery
//!
//! Every listener is owned by exactly one task or handle and deregisters
//! when dropped, so no registration outlives the session that created it.

mod bus;
mod latch;
mod subscription;
mod wait_for;

pub use bus::{BusListener, ChangeBus, CounterHook};
pub use latch::ResolutionLatch;
pub use subscription::{ChannelDelivery, DocumentStream, PushDelivery, SubscriptionHandle};
pub use wait_for::{LiveMatcher, PollSource, WaitFor, WaitOutcome, WaitReason};
