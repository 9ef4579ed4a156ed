use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use tally_common::error::TallyError;
use tracing::info;
use uuid::Uuid;

use crate::{handlers::ApiError, router::AppState};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

pub fn seed_users() -> Vec<User> {
    [
        (1, "Alice", "alice@example.com"),
        (2, "Bob", "bob@example.com"),
        (3, "Charlie", "charlie@example.com"),
    ]
    .into_iter()
    .map(|(id, name, email)| User {
        id,
        name: name.to_string(),
        email: email.to_string(),
    })
    .collect()
}

pub async fn home(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": format!("Welcome to {}", state.info.name),
        "endpoints": {
            "/": "This home page",
            "/api/users": "Get list of users",
            "/api/orders": "Create an order (POST)",
            "/api/health": "Health check",
            "/metrics": "Prometheus metrics",
        },
    }))
}

#[derive(Serialize)]
struct UserList<'a> {
    count: usize,
    users: &'a [User],
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.business_metrics.set_active_users(state.users.len())?;

    let body = serde_json::to_value(UserList {
        count: state.users.len(),
        users: &state.users,
    })
    .map_err(|err| TallyError::InternalError(format!("failed to encode users: {err}")))?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub order_id: String,
    pub amount: f64,
    pub currency: &'static str,
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(TallyError::InvalidArgument(format!(
            "order amount must be a positive number, got {}",
            request.amount
        ))
        .into());
    }

    let amount = (request.amount * 100.0).round() / 100.0;
    state.business_metrics.record_order(amount)?;

    let order_id = Uuid::new_v4().to_string();
    info!(%order_id, amount, "order created");

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            success: true,
            order_id,
            amount,
            currency: "USD",
        }),
    ))
}
