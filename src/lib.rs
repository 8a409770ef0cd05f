//! A pipeline resource that deploys to, and reports on, one deployment of a
//! BOSH director.

pub mod archive;
pub mod artifact;
pub mod boshio;
pub mod command;
pub mod concourse;
pub mod config;
pub mod director;
pub mod globs;
pub mod manifest;
pub mod source;
pub mod storage;
pub mod vars_store;
pub mod version;

#[cfg(test)]
mod fakes;
