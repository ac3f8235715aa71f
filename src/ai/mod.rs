pub mod client;
pub mod evaluator;
pub mod pipeline;
pub mod report;
