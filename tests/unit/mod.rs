//! Unit tests for individual components

mod analytics_test;
mod api_test;
mod builders_test;
mod config_test;
mod error_test;
mod runtime_test;
mod util_test;
