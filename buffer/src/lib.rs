//! Buffering layer between clients and the precision flavours of a target
//! service.
//!
//! The [`router`] accepts any HTTP request, publishes it onto a headers
//! exchange with a flavour chosen from the current schedule, and correlates
//! the asynchronous reply back to the caller. The [`consumer`] drains the
//! per-flavour queues, forwards each embedded request to the real target
//! under a schedule-driven processing throttle, and answers RPC-style.

pub mod broker;
pub mod consumer;
pub mod envelope;
pub mod metrics;
pub mod router;
pub mod schedule;
pub mod weights;
