//! Trade chat log analysis: parse offer lines into records, search and filter
//! them, and rate prices against a reference table and market statistics.

pub mod config;
pub mod currency;
pub mod error;
pub mod insight;
pub mod loader;
pub mod model;
pub mod parser;
pub mod pricing;
pub mod quantity;
pub mod query;
pub mod search;
pub mod sellers;
pub mod stats;

pub use config::Config;
pub use error::{ConfigError, IngestError, ReferenceError};
pub use loader::{IngestEvent, IngestJob, IngestOptions, IngestSummary};
pub use model::{
    OrderType, PriceEvaluation, PriceIntelligence, PriceRating, Rarity, ReferencePriceTable,
    TradeRecord,
};
pub use parser::TradeLineParser;
pub use search::SearchEngine;
