//! Swap-order status passthrough

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::models::plan::ErrorResponse;
use crate::services::swap_gateway::SwapError;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub status: String,
    pub destination_tx_id: Option<String>,
}

pub async fn get_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let status = state.swap.order_status(&order_id).await.map_err(|e| {
        let code = match e {
            SwapError::Rejected(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_GATEWAY,
        };
        (
            code,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })?;

    Ok(Json(OrderStatusResponse {
        order_id: status.order_id,
        status: status.status,
        destination_tx_id: status.destination_tx_id,
    }))
}
