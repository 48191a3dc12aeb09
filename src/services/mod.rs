pub mod aggregator;
pub mod cancellation;
pub mod chunked_reader;
pub mod controller;
pub mod estimator;
pub mod file_processor;
pub mod report;
pub mod sniffer;
