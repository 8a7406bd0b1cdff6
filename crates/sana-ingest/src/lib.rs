//! Idempotent chat ingestion building blocks for Sana.
//!
//! Provides the inbound event contract, windowed fingerprint caches, the
//! ingestion gate that answers each unique event at most once, per-channel
//! bot toggles, the conversation journal, and the background expiry sweep.
//!
//! ```rust
//! use sana_ingest::{event_fingerprint, parse_inbound_chat_event};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = r#"{
//!   "event_id": "evt-42",
//!   "sender": "628123@s.whatsapp.net",
//!   "sender_display": "Ana",
//!   "text": "hello",
//!   "received_at_ms": 1760100000000
//! }"#;
//!
//! let event = parse_inbound_chat_event(raw)?;
//! let fingerprint = event_fingerprint(&event);
//! assert_eq!(fingerprint.len(), 32);
//! # Ok(())
//! # }
//! ```

pub mod ingest_contract;
pub mod ingest_fingerprint;
pub mod ingest_gate;
pub mod ingest_journal;
pub mod ingest_outbound;
pub mod ingest_reply;
pub mod ingest_sweep;
pub mod ingest_toggles;

pub use ingest_contract::*;
pub use ingest_fingerprint::*;
pub use ingest_gate::*;
pub use ingest_journal::*;
pub use ingest_outbound::*;
pub use ingest_reply::*;
pub use ingest_sweep::*;
pub use ingest_toggles::*;
