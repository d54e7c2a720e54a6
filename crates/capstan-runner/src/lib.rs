//! Task runners for Capstan.
//!
//! [`CapistranoRunner`] asks a Capistrano-compatible `cap` binary which tasks
//! the recipes of a stage define.

pub mod capistrano;

pub use capistrano::{CapistranoRunner, parse_task_list};
