use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use fakebooks_core::AccountItem;
use serde_json::{json, Value};

use super::CompanyQuery;
use crate::{collections::ACCOUNT_ITEMS, error::ApiError, server::Emulator};

pub async fn list(
    State(emulator): State<Arc<Emulator>>,
    query: Result<Query<CompanyQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let items: Vec<AccountItem> = emulator
        .store
        .scan(ACCOUNT_ITEMS, |item: &AccountItem| query.admits(item.company_id))?;
    Ok(Json(json!({ "account_items": items })))
}
