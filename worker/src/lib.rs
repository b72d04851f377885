//! The schedule table and its trip index live on a dedicated worker thread;
//! the rest of the application only talks to it through messages. This crate
//! has both halves: the worker loop that owns the bytes, and the caller-side
//! client that correlates requests with completions.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod client;
mod protocol;
mod worker;

pub use client::{LoadProgress, ScheduleClient};
pub use protocol::{Event, Request, FILTERED_STOP_TIMES};
pub use worker::ScheduleWorker;
