pub mod analytics;
pub mod backup;
pub mod core;
pub mod responses;
pub mod surveys;
