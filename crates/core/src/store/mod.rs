//! On-disk persistence for tasks, projects, session logs, and daemon state.
//!
//! Every YAML write goes through [`yaml::save_yaml`], which serializes to a
//! temp file in the target directory and renames it over the destination, so
//! the file watcher always sees complete files.

pub mod logs;
pub mod projects;
pub mod state;
pub mod tasks;
pub mod yaml;
