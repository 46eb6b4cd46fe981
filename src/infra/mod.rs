// Infrastructure adapters implementing the application ports

pub mod http_client;
pub mod ingest_log_adapter;
pub mod payload_store;
