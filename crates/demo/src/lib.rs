//! Sample wiring of deferred calls: receiver types, a dispatcher and a worker.

pub mod app;
