pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod executors;
pub mod job;
pub mod reaper;
pub mod report;
pub mod shutdown;
pub mod source;

#[cfg(test)]
mod testing;
