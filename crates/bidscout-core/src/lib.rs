//! Core domain model and pure matching/normalization logic for bidscout.

pub mod canonical;
pub mod matcher;
pub mod model;

pub use canonical::{canonicalize, clean_url, is_search_proxy};
pub use matcher::{MatchResult, Matcher};
pub use model::*;
