//! Core types and logic for RFID case reconciliation.
//!
//! Everything in this crate is pure: no I/O, no clocks, no async. The
//! `monitor` service feeds it decoded payloads and case definitions and
//! renders whatever comes back.

pub mod cases;
pub mod extract;
pub mod reconcile;

pub use cases::{Case, CaseError, format_cases, parse_cases};
pub use extract::{extract_all_tag_ids, extract_first_tag_id};
pub use reconcile::{CaseReport, CaseStatus, ReadSet, Reconciliation, read_set_from, reconcile};

/// Canonical identifier of a physical tag. Compared by exact string equality
/// after trimming; no case or separator normalization.
pub type TagId = String;
