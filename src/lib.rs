//! `pool-sentinel`: the streaming ingestion core, pool tracker, metadata
//! correlator, emission pipeline, and outcome learner (spec §4.E-I). Binary
//! decoding and the data model live in `pool-codec`; feature extraction and
//! risk scoring live in `pool-risk`. This crate wires all three into a single
//! `PoolMonitor` that owns every shared-state component as a field (spec §9:
//! "never globals").

pub mod bounded;
pub mod config;
pub mod correlator;
pub mod emission;
pub mod error;
pub mod learner;
pub mod monitor;
pub mod subscription;
pub mod tracker;

pub use config::Config;
pub use monitor::PoolMonitor;
