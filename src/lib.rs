pub mod error;
pub mod metadata;
pub mod cube;
pub mod time_units;
pub mod stats;
pub mod loader;
pub mod variable;
pub mod derive;
pub mod ensemble;
pub mod plotting;
pub mod config;
pub mod pipeline;
pub mod logging;

#[cfg(test)]
pub(crate) mod test_utils;
