//! Wallet setup surface: keystore registration, password cache, removal

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, Set};

use crate::entities::{prelude::*, wallets};
use crate::models::plan::ErrorResponse;
use crate::models::wallet::{RegisterWalletRequest, SetPasswordRequest, WalletResponse};
use crate::AppState;

fn db_error(e: sea_orm::DbErr) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("Database error: {}", e),
        }),
    )
}

pub async fn register_wallet(
    State(state): State<AppState>,
    Json(req): Json<RegisterWalletRequest>,
) -> Result<(StatusCode, Json<WalletResponse>), (StatusCode, Json<ErrorResponse>)> {
    let address = state
        .signer
        .save_keystore(req.owner_id, &req.keystore)
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    let existing = Wallets::find()
        .filter(wallets::Column::OwnerId.eq(req.owner_id))
        .one(&state.db)
        .await
        .map_err(db_error)?;

    let keystore_path = state
        .signer
        .keystore_path(req.owner_id)
        .display()
        .to_string();

    match existing {
        Some(wallet) => {
            let mut active: wallets::ActiveModel = wallet.into();
            active.address = Set(address.clone());
            active.keystore_path = Set(keystore_path);
            active.update(&state.db).await.map_err(db_error)?;
        }
        None => {
            let wallet = wallets::ActiveModel {
                owner_id: Set(req.owner_id),
                address: Set(address.clone()),
                keystore_path: Set(keystore_path),
                created_at: Set(Utc::now().into()),
                ..Default::default()
            };
            wallet.insert(&state.db).await.map_err(db_error)?;
        }
    }

    tracing::info!(owner_id = req.owner_id, "Wallet registered");
    Ok((
        StatusCode::CREATED,
        Json(WalletResponse {
            owner_id: req.owner_id,
            address,
            password_cached: state.signer.passwords().contains(req.owner_id),
        }),
    ))
}

pub async fn set_password(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
    Json(req): Json<SetPasswordRequest>,
) -> Result<Json<WalletResponse>, (StatusCode, Json<ErrorResponse>)> {
    // Prove the password opens the keystore before caching it
    state
        .signer
        .verify_password(owner_id, &req.password)
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    state.signer.passwords().set(owner_id, req.password.clone());
    if req.persist {
        if let Err(e) = state.credentials.save(owner_id, &req.password) {
            // The in-memory cache still works for this process lifetime
            tracing::warn!(owner_id = owner_id, error = %e, "Keyring save failed");
        }
    }

    let wallet = Wallets::find()
        .filter(wallets::Column::OwnerId.eq(owner_id))
        .one(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("No wallet registered for owner {}", owner_id),
                }),
            )
        })?;

    Ok(Json(WalletResponse {
        owner_id,
        address: wallet.address,
        password_cached: true,
    }))
}

pub async fn delete_wallet(
    State(state): State<AppState>,
    Path(owner_id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    // Removing the wallet also invalidates the cached password and the
    // keyring entry
    state.signer.delete_keystore(owner_id).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })?;
    if let Err(e) = state.credentials.delete(owner_id) {
        tracing::warn!(owner_id = owner_id, error = %e, "Keyring delete failed");
    }

    if let Some(wallet) = Wallets::find()
        .filter(wallets::Column::OwnerId.eq(owner_id))
        .one(&state.db)
        .await
        .map_err(db_error)?
    {
        wallet.delete(&state.db).await.map_err(db_error)?;
    }

    tracing::info!(owner_id = owner_id, "Wallet deleted");
    Ok(StatusCode::NO_CONTENT)
}
