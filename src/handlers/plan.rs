//! Plan command surface (create / list / cancel)
//!
//! Stands in for the chat-platform commands; the executor itself never goes
//! through these handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;

use crate::entities::{attempts, dca_plans, prelude::*, wallets};
use crate::models::plan::{validate_destination, CreatePlanRequest, ErrorResponse, PlanResponse};
use crate::services::networks;
use crate::services::plan_store::plan_states;
use crate::AppState;

fn db_error(e: sea_orm::DbErr) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Database error: {}", e),
        }),
    )
}

fn bad_request(error: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PlanResponse>), (StatusCode, Json<ErrorResponse>)> {
    networks::get_network(&req.network_key).map_err(|e| bad_request(e.to_string()))?;

    if req.amount <= Decimal::ZERO {
        return Err(bad_request("amount must be positive".to_string()));
    }
    if req.interval_hours < 1 {
        return Err(bad_request("interval must be at least one hour".to_string()));
    }
    validate_destination(&req.destination_asset, &req.destination_address)
        .map_err(bad_request)?;

    // A plan without a wallet could never execute
    let wallet = Wallets::find()
        .filter(wallets::Column::OwnerId.eq(req.owner_id))
        .one(&state.db)
        .await
        .map_err(db_error)?;
    if wallet.is_none() {
        return Err(bad_request(format!(
            "No wallet registered for owner {}; register one first",
            req.owner_id
        )));
    }

    let now = Utc::now();
    let plan = dca_plans::ActiveModel {
        owner_id: Set(req.owner_id),
        network_key: Set(req.network_key),
        amount: Set(req.amount),
        destination_asset: Set(req.destination_asset.to_uppercase()),
        destination_address: Set(req.destination_address),
        interval_secs: Set(req.interval_hours * 3600),
        // Due immediately; the first purchase happens on the next tick
        next_run_at: Set(now.into()),
        state: Set(plan_states::IDLE.to_string()),
        active: Set(true),
        deleted: Set(false),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    };
    let plan = plan.insert(&state.db).await.map_err(db_error)?;

    tracing::info!(
        plan_id = plan.id,
        owner_id = plan.owner_id,
        network = %plan.network_key,
        "Plan created"
    );
    Ok((
        StatusCode::CREATED,
        Json(PlanResponse::from_models(plan, None)),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPlansQuery {
    pub owner_id: i64,
}

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> Result<Json<Vec<PlanResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let plans = DcaPlans::find()
        .filter(dca_plans::Column::OwnerId.eq(query.owner_id))
        .filter(dca_plans::Column::Deleted.eq(false))
        .order_by(dca_plans::Column::Id, Order::Asc)
        .all(&state.db)
        .await
        .map_err(db_error)?;

    let mut responses = Vec::with_capacity(plans.len());
    for plan in plans {
        let last_attempt = Attempts::find()
            .filter(attempts::Column::PlanId.eq(plan.id))
            .order_by(attempts::Column::Id, Order::Desc)
            .one(&state.db)
            .await
            .map_err(db_error)?;
        responses.push(PlanResponse::from_models(plan, last_attempt));
    }
    Ok(Json(responses))
}

pub async fn cancel_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<i32>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let plan = DcaPlans::find_by_id(plan_id)
        .one(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Plan {} not found", plan_id),
                }),
            )
        })?;

    // Soft-deactivate: attempt history keeps referencing the row
    let mut active: dca_plans::ActiveModel = plan.into();
    active.active = Set(false);
    active.deleted = Set(true);
    active.updated_at = Set(Utc::now().into());
    active.update(&state.db).await.map_err(db_error)?;

    tracing::info!(plan_id = plan_id, "Plan cancelled");
    Ok(StatusCode::NO_CONTENT)
}
