#![forbid(unsafe_code)]
//! Enforce a set of labels on Prometheus artefacts:
//!
//! * PromQL expressions, where every selector is made to match the enforced `name="value"`
//!   pairs ([`enforce`], [`promql`]).
//! * Metrics in the text exposition format, where every sample gets the pairs appended
//!   ([`exposition`]).
//!
//! The exposition format is described here:
//! <https://prometheus.io/docs/instrumenting/exposition_formats/>
pub use error::Error;

pub mod config;
pub mod enforce;
mod error;
mod escape;
pub mod exposition;
pub mod pipeline;
pub mod promql;
pub mod telemetry;
