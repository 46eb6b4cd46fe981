// Pipeline processing: bronze parsing, silver normalization and quality gating, gold enrichment

pub mod enrich;
pub mod normalize;
pub mod parser;
pub mod quality_gate;
