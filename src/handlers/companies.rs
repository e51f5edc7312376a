use std::sync::Arc;

use axum::{
    extract::{rejection::PathRejection, Path, State},
    Json,
};
use fakebooks_core::{Company, RecordId};
use serde_json::{json, Value};

use crate::{collections::COMPANIES, error::ApiError, server::Emulator};

pub async fn list(State(emulator): State<Arc<Emulator>>) -> Result<Json<Value>, ApiError> {
    let companies: Vec<Company> = emulator.store.scan(COMPANIES, |_| true)?;
    Ok(Json(json!({ "companies": companies })))
}

pub async fn get(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let company: Company = emulator.store.get(COMPANIES, id)?;
    Ok(Json(json!({ "company": company })))
}
