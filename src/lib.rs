pub mod error;
pub mod logging;
pub mod settings;
pub mod model_config;
pub mod time_axis;
pub mod cf_time;
pub mod grid;
pub mod field;
pub mod source;
pub mod catalog;
pub mod intermediate;
pub mod driver;

#[cfg(test)]
pub(crate) mod test_utils;
