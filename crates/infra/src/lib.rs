//! Infrastructure layer: catalog stores, blob storage, queue, partition
//! files and the services built on them.

pub mod blob;
pub mod catalog;
pub mod clearer;
pub mod config;
pub mod effective_view;
pub mod locks;
pub mod orchestrator;
pub mod partitions;
pub mod payload;
pub mod queue;
pub mod registry;
pub mod worker;

mod integration_tests;
