pub mod anomaly;
pub mod report;
