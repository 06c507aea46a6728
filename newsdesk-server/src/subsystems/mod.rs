pub mod agent;
pub mod refresh;
