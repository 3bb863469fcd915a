pub mod baseline;
pub mod config;
pub mod consensus;
pub mod defects;
pub mod errors;
pub mod escalation;
pub mod feedback;
pub mod fingerprint;
pub mod jobs;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod regression;
pub mod storage;
pub mod thresholds;
