//! Client for a remote map-construction service.
//!
//! [`mapper::Mapper`] is the controller a host embeds and ticks once per
//! frame; [`cli`] is the command-line host built on it.

pub mod backend;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod geodesy;
pub mod integrity;
pub mod job;
pub mod location;
pub mod mapper;
pub mod model;
pub mod queue;
pub mod registry;
pub mod session;
pub mod status;
pub mod storage;
pub mod token;

#[cfg(test)]
mod testing;
