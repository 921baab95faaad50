pub mod anomaly;
pub mod engine;
pub mod sector;
