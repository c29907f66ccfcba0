//! Change-notification broadcasting for job rows.

pub mod job_events;

pub use job_events::{JobChangeBroadcaster, JobChangeEvent};
