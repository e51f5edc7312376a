use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use fakebooks_core::{Company, Deal, DealPatch, DealType, NewDeal, RecordId};
use serde::Deserialize;
use serde_json::{json, Value};

use super::referenced;
use crate::{
    collections::{COMPANIES, DEALS},
    error::ApiError,
    server::Emulator,
    settlement::{settle_payments, SettlementOutcome},
};

#[derive(Debug, Default, Deserialize)]
pub struct DealQuery {
    pub company_id: Option<RecordId>,
    #[serde(rename = "type")]
    pub deal_type: Option<DealType>,
}

pub async fn list(
    State(emulator): State<Arc<Emulator>>,
    query: Result<Query<DealQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let deals: Vec<Deal> = emulator.store.scan(DEALS, |d: &Deal| {
        query.company_id.map_or(true, |id| id == d.company_id) && query.deal_type.map_or(true, |t| t == d.deal_type)
    })?;
    Ok(Json(json!({ "deals": deals })))
}

/// Writes the deal and, in the same transaction, settles the wallet
/// transactions its payment lines match.
pub async fn create(
    State(emulator): State<Arc<Emulator>>,
    body: Result<Json<NewDeal>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(body) = body?;
    let now = emulator.now();

    let (deal, outcomes) = emulator.store.update(|txn| -> Result<(Deal, Vec<SettlementOutcome>), ApiError> {
        let id = txn.next_id(DEALS)?;
        let deal = body.into_record(id, now)?;
        let _: Company = referenced(txn, COMPANIES, deal.company_id, "company")?;
        txn.put(DEALS, id, &deal)?;
        let outcomes = settle_payments(txn, &deal, now)?;
        Ok((deal, outcomes))
    })?;

    let settled = outcomes
        .iter()
        .filter(|o| matches!(o, SettlementOutcome::Settled { .. }))
        .count();
    tracing::info!(
        id = deal.id,
        company_id = deal.company_id,
        amount = deal.amount,
        payments = deal.payments.len(),
        settled,
        "Deal created"
    );
    Ok((StatusCode::CREATED, Json(json!({ "deal": deal }))))
}

pub async fn get(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let deal: Deal = emulator.store.get(DEALS, id)?;
    Ok(Json(json!({ "deal": deal })))
}

/// Patches the deal. Changed payment lines are stored as given; settlement
/// only ever runs on create.
pub async fn update(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
    body: Result<Json<DealPatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    let now = emulator.now();

    let deal = emulator.store.update(|txn| -> Result<Deal, ApiError> {
        let mut deal: Deal = txn.get(DEALS, id)?;
        patch.apply(&mut deal, now)?;
        txn.put(DEALS, id, &deal)?;
        Ok(deal)
    })?;

    tracing::info!(id, amount = deal.amount, "Deal updated");
    Ok(Json(json!({ "deal": deal })))
}

/// Removes the deal. Wallet transactions it settled stay settled.
pub async fn delete(
    State(emulator): State<Arc<Emulator>>,
    id: Result<Path<RecordId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    emulator.store.delete(DEALS, id)?;
    tracing::info!(id, "Deal deleted");
    Ok(StatusCode::NO_CONTENT)
}
