//! HTTP handlers, one module per resource.
//!
//! Single records are wrapped as `{"deal": {...}}` and lists as
//! `{"deals": [...]}`, matching the upstream API's envelopes.

use fakebooks_core::RecordId;
use fakebooks_sqlite::Txn;
use serde::{de::DeserializeOwned, Deserialize};

use crate::error::ApiError;

pub mod account_items;
pub mod companies;
pub mod deals;
pub mod journals;
pub mod oauth;
pub mod receipts;
pub mod wallet_txns;
pub mod walletables;

/// The `company_id` filter shared by most list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct CompanyQuery {
    pub company_id: Option<RecordId>,
}

impl CompanyQuery {
    pub fn admits(&self, company_id: RecordId) -> bool {
        self.company_id.map_or(true, |wanted| wanted == company_id)
    }
}

/// Loads a record that a request body refers to. A dangling reference is the
/// caller's mistake, so it reports `invalid_parameter` rather than 404.
pub(crate) fn referenced<T: DeserializeOwned>(
    txn: &Txn<'_>,
    collection: &str,
    id: RecordId,
    what: &str,
) -> Result<T, ApiError> {
    txn.get(collection, id).map_err(|e| {
        if e.is_not_found() {
            ApiError::InvalidParameter(format!("{} {} does not exist", what, id))
        } else {
            e.into()
        }
    })
}
