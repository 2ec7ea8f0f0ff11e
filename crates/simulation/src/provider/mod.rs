//! Test providers for simulation testing.
//!
//! These send functions record every call and answer from a script, so a
//! test can stage timeouts, 5xx bursts, rejections and slow calls.

mod scripted;

pub use scripted::{CapturedCall, ScriptedProvider, failed_reply, ok_reply};
