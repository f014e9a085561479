//! Core domain types shared by the sqsd crates.
//!
//! Provides the queue message model, the queue error taxonomy, and the clock
//! abstraction used to make polling and backoff timing testable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{QueueError, Result};
pub use models::{Message, MessageId, ReceiptHandle};
pub use time::{Clock, RealClock, TestClock};
