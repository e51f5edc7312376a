//! Core types for the fakebooks accounting API emulator.
//!
//! This crate holds the persisted entity records, the request payloads that
//! create or patch them, and the `StoreError` type shared with the storage
//! engine, so handlers and storage agree on one vocabulary.

pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{
    AccountItem, Company, Deal, DealDetail, DealPayment, DealType, EntrySide, Journal,
    JournalDetail, JournalSide, Receipt, RecordId, UnknownVariant, WalletTxn, WalletTxnStatus,
    Walletable, WalletableType,
};
pub use models::write::{
    parse_date, DealPatch, NewDeal, NewDealDetail, NewDealPayment, NewJournal,
    NewJournalDetail, NewReceipt, NewWalletTxn, ValidationError, WalletTxnPatch,
};
pub use storage::StoreError;
