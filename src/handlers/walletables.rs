use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use fakebooks_core::{RecordId, Walletable, WalletableType};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{collections::WALLETABLES, error::ApiError, server::Emulator};

#[derive(Debug, Default, Deserialize)]
pub struct WalletableQuery {
    pub company_id: Option<RecordId>,
    #[serde(rename = "type")]
    pub walletable_type: Option<WalletableType>,
}

pub async fn list(
    State(emulator): State<Arc<Emulator>>,
    query: Result<Query<WalletableQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let walletables: Vec<Walletable> = emulator.store.scan(WALLETABLES, |w: &Walletable| {
        query.company_id.map_or(true, |id| id == w.company_id)
            && query.walletable_type.map_or(true, |t| t == w.walletable_type)
    })?;
    Ok(Json(json!({ "walletables": walletables })))
}
