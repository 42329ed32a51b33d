//! Bounded job queue plus a fixed-size worker pool (spec §4.7, §11): the
//! ingest pipeline's unit of work ([IngestJob]) and the queue it flows
//! through ([JobQueue]). The pool itself is plain `std::thread::spawn` over
//! [crate::ingest::IngestPipeline]'s worker loop, one thread per CPU,
//! joined on drop -- see [JobQueue]'s module doc for why a pending-counter
//! close signal was needed here instead of a gen-server pool abstraction
//! (recursive job resubmission from within a worker rules out a
//! fixed-request-count pool).

mod job;
mod queue;

pub use job::IngestJob;
pub use queue::JobQueue;
