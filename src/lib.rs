//! QueryTap - in-process query profiler
//!
//! Hosts dispatch every database operation through a [`registry::HookRegistry`].
//! A [`session::ProfilingSession`] subscribes to one engine (or all of them),
//! turns each observed operation into an [`record::ExecutionRecord`] and
//! queues it until collected. [`aggregate::aggregate`] groups collected
//! records by query text and call site, and [`report`] renders the result as
//! text, HTML or JSON.

pub mod aggregate;
pub mod capture;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod params;
pub mod record;
pub mod registry;
pub mod report;
pub mod session;
pub mod sink;
