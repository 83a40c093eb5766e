pub mod aggregator;
pub mod config;
pub mod derived_config;
pub mod dispatcher;
pub mod history;
pub mod instances;
pub mod panel;
pub mod query_result;
pub mod selection;
