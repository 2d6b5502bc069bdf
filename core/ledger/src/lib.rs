//! Upload history for VoucherSnap.
//!
//! An append-only ledger of completed uploads, persisted as one JSON file.
//! Callers ask it whether an item was sent before so the user can be warned
//! about duplicates; the ledger itself never blocks a repeat upload.

pub mod entry;
pub mod ledger;

pub use entry::{LedgerEntry, LedgerIdentity, UploadDetails, UploadOutcome};
pub use ledger::UploadLedger;
