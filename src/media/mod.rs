//! Per-request media job pipeline
//!
//! One inbound clip becomes one bounded unit of work: acquire the source
//! into scratch, run the external transcoder, deliver the round note,
//! charge quota, release scratch — with cleanup guaranteed on every exit
//! path.

pub mod pipeline;
pub mod scratch;
pub mod transcode;

pub use pipeline::{JobFailure, JobIo, JobOutcome, JobRequest, JobStage, Pipeline, RejectReason};
pub use scratch::ScratchPair;
pub use transcode::Transcoder;
