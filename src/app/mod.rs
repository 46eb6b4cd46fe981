pub mod enrich_use_case;
pub mod ingest_use_case;
pub mod normalize_use_case;
pub mod parse_use_case;
pub mod ports;
