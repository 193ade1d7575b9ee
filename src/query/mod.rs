pub mod breakdowns;
pub mod campaigns;
pub mod devices;
pub mod error;
pub mod events;
pub mod filters;
pub mod funnel;
pub mod geography;
pub mod granularity;
pub mod journey;
pub mod metrics;
pub mod pages;
pub mod referrers;
pub mod rows;
pub mod scope;
pub mod sessions;
pub mod sql;
pub mod visitors;
