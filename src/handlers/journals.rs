use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use fakebooks_core::{Company, Journal, NewJournal, RecordId};
use serde_json::{json, Value};

use super::{referenced, CompanyQuery};
use crate::{
    collections::{COMPANIES, JOURNALS},
    error::ApiError,
    server::Emulator,
};

pub async fn list(
    State(emulator): State<Arc<Emulator>>,
    query: Result<Query<CompanyQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let journals: Vec<Journal> = emulator.store.scan(JOURNALS, |j: &Journal| query.admits(j.company_id))?;
    Ok(Json(json!({ "journals": journals })))
}

pub async fn create(
    State(emulator): State<Arc<Emulator>>,
    body: Result<Json<NewJournal>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(body) = body?;
    let now = emulator.now();

    let journal = emulator.store.update(|txn| -> Result<Journal, ApiError> {
        let id = txn.next_id(JOURNALS)?;
        let journal = body.into_record(id, now)?;
        let _: Company = referenced(txn, COMPANIES, journal.company_id, "company")?;
        txn.put(JOURNALS, id, &journal)?;
        Ok(journal)
    })?;

    if !journal.is_balanced() {
        tracing::debug!(id = journal.id, "Journal stored with unequal debit and credit totals");
    }
    tracing::info!(id = journal.id, lines = journal.details.len(), "Journal created");
    Ok((StatusCode::CREATED, Json(json!({ "journal": journal }))))
}

pub async fn get(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let journal: Journal = emulator.store.get(JOURNALS, id)?;
    Ok(Json(json!({ "journal": journal })))
}
