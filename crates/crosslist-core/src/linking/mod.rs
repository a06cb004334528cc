//! Linking of items across the two sides
//!
//! Two stages run over unlinked, live items:
//! - **Exact**: normalized names equal, with rules for duplicate names
//! - **Fuzzy**: longest-common-subsequence ratio at or above a threshold

mod linker;
mod normalization;
mod similarity;

pub use linker::{ItemLinker, LinkMatch, LinkingSummary, MatchStrategy};
pub use normalization::normalize_name;
pub use similarity::lcs_ratio;
