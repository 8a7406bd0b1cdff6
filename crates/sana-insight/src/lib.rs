//! Multi-source user-insight reconciliation for Sana.
//!
//! Provides canonical contact identity, the update-fragment contract with
//! tolerant analysis normalization, the reconciliation store with change
//! subscriptions, and cached-snapshot persistence.
//!
//! ```rust
//! use sana_insight::{
//!     DetailPatch, FragmentSource, InsightFragment, InsightStore,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InsightStore::new();
//! let receipt = store.merge(&InsightFragment {
//!     details: DetailPatch {
//!         name: Some("Ana".to_string()),
//!         ..DetailPatch::default()
//!     },
//!     ..InsightFragment::new(FragmentSource::Push, "628123", 1_760_100_000_000)
//! })?;
//! assert!(receipt.created);
//! assert_eq!(receipt.user_id, "628123@s.whatsapp.net");
//! # Ok(())
//! # }
//! ```

pub mod insight_contract;
pub mod insight_identity;
pub mod insight_snapshot;
pub mod insight_store;

pub use insight_contract::*;
pub use insight_identity::*;
pub use insight_snapshot::*;
pub use insight_store::*;
