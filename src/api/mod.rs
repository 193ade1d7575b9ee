pub mod errors;
pub mod funnels;
pub mod stats;
