use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use fakebooks_core::{
    Company, NewWalletTxn, RecordId, WalletTxn, WalletTxnPatch, WalletTxnStatus, Walletable, WalletableType,
};
use fakebooks_sqlite::Txn;
use serde::Deserialize;
use serde_json::{json, Value};

use super::referenced;
use crate::{
    collections::{COMPANIES, WALLETABLES, WALLET_TXNS},
    error::ApiError,
    server::Emulator,
};

#[derive(Debug, Default, Deserialize)]
pub struct WalletTxnQuery {
    pub company_id: Option<RecordId>,
    /// `1`/`unbooked` or `2`/`settled`.
    pub status: Option<String>,
    pub walletable_type: Option<WalletableType>,
    pub walletable_id: Option<RecordId>,
}

struct WalletTxnFilter {
    company_id: Option<RecordId>,
    status: Option<WalletTxnStatus>,
    walletable_type: Option<WalletableType>,
    walletable_id: Option<RecordId>,
}

impl WalletTxnFilter {
    fn from_query(query: WalletTxnQuery) -> Result<Self, ApiError> {
        let status = match query.status.as_deref() {
            Some(raw) => Some(
                raw.parse::<WalletTxnStatus>()
                    .map_err(|e| ApiError::InvalidParameter(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            company_id: query.company_id,
            status,
            walletable_type: query.walletable_type,
            walletable_id: query.walletable_id,
        })
    }

    fn admits(&self, txn: &WalletTxn) -> bool {
        self.company_id.map_or(true, |id| id == txn.company_id)
            && self.status.map_or(true, |s| s == txn.status)
            && self.walletable_type.map_or(true, |t| t == txn.walletable_type)
            && self.walletable_id.map_or(true, |id| id == txn.walletable_id)
    }
}

/// The company must exist and the walletable must belong to it with the
/// stated type.
fn check_references(txn: &Txn<'_>, record: &WalletTxn) -> Result<(), ApiError> {
    let _: Company = referenced(txn, COMPANIES, record.company_id, "company")?;
    let walletable: Walletable = referenced(txn, WALLETABLES, record.walletable_id, "walletable")?;
    if walletable.company_id != record.company_id || walletable.walletable_type != record.walletable_type {
        return Err(ApiError::InvalidParameter(format!(
            "walletable {} is not a {} of company {}",
            record.walletable_id, record.walletable_type, record.company_id
        )));
    }
    Ok(())
}

pub async fn list(
    State(emulator): State<Arc<Emulator>>,
    query: Result<Query<WalletTxnQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let filter = WalletTxnFilter::from_query(query)?;
    let txns: Vec<WalletTxn> = emulator.store.scan(WALLET_TXNS, |t: &WalletTxn| filter.admits(t))?;
    Ok(Json(json!({ "wallet_txns": txns })))
}

pub async fn create(
    State(emulator): State<Arc<Emulator>>,
    body: Result<Json<NewWalletTxn>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(body) = body?;
    let now = emulator.now();

    let record = emulator.store.update(|txn| -> Result<WalletTxn, ApiError> {
        let id = txn.next_id(WALLET_TXNS)?;
        let record = body.into_record(id, now)?;
        check_references(txn, &record)?;
        txn.put(WALLET_TXNS, id, &record)?;
        Ok(record)
    })?;

    tracing::info!(
        id = record.id,
        company_id = record.company_id,
        walletable = %record.walletable_type,
        walletable_id = record.walletable_id,
        amount = record.amount,
        "Wallet transaction created"
    );
    Ok((StatusCode::CREATED, Json(json!({ "wallet_txn": record }))))
}

pub async fn get(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let record: WalletTxn = emulator.store.get(WALLET_TXNS, id)?;
    Ok(Json(json!({ "wallet_txn": record })))
}

pub async fn update(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
    body: Result<Json<WalletTxnPatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    let now = emulator.now();

    let record = emulator.store.update(|txn| -> Result<WalletTxn, ApiError> {
        let mut record: WalletTxn = txn.get(WALLET_TXNS, id)?;
        let moves = patch.touches_walletable();
        patch.apply(&mut record, now)?;
        if moves {
            check_references(txn, &record)?;
        }
        txn.put(WALLET_TXNS, id, &record)?;
        Ok(record)
    })?;

    tracing::info!(id, status = record.status.as_str(), "Wallet transaction updated");
    Ok(Json(json!({ "wallet_txn": record })))
}

pub async fn delete(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    emulator.store.delete(WALLET_TXNS, id)?;
    tracing::info!(id, "Wallet transaction deleted");
    Ok(StatusCode::NO_CONTENT)
}
