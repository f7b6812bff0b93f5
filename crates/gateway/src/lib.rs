pub mod worker;

pub use worker::client::WorkerClient;
pub use worker::config::WorkerConfig;
