//! Account summary and listing.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::{AccountRow, AccountSummary};
use crate::store::Deadline;
use crate::utils::response::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub account_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct AccountListQuery {
    pub user_id: i64,
}

/// GET /account/summary — balance plus positions; owner only.
pub async fn account_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<AccountSummary>, AppError> {
    let deadline = Deadline::after(state.config.store_timeout());

    match state.account_store.owner_of(query.account_id, deadline).await? {
        None => return Err(AppError::not_found("account not found")),
        Some(owner) if owner != query.user_id => {
            return Err(AppError::forbidden("account belongs to another user"))
        }
        Some(_) => {}
    }

    let summary = state
        .account_store
        .summary(query.account_id, deadline)
        .await?
        .ok_or_else(|| AppError::not_found("account not found"))?;
    Ok(Json(summary))
}

/// GET /account/list — the caller's accounts.
pub async fn account_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AccountListQuery>,
) -> Result<Json<Vec<AccountRow>>, AppError> {
    let deadline = Deadline::after(state.config.store_timeout());
    let accounts = state
        .account_store
        .accounts_for_user(query.user_id, deadline)
        .await?;
    Ok(Json(accounts))
}
