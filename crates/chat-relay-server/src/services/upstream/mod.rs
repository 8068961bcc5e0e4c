//! Completion endpoint plumbing: request assembly, the retried HTTP call and
//! reply extraction.

pub mod client;
pub mod extractor;
pub mod request_builder;
pub mod retry;

pub use client::{CompletionResponse, HttpTransport, UpstreamClient, UpstreamTransport};
pub use request_builder::CompletionRequest;
pub use retry::{RetryOutcome, RetryPolicy, Sleeper, TokioSleeper};
