// Application layer: job runner, periodic scheduler and the concrete jobs.

pub mod bootstrap;
pub mod jobs;
pub mod runner;
pub mod scheduler;
pub mod state;
