// src/handlers/dashboard.rs

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    common::error::AppError,
    config::AppState,
    models::{
        auth::RequestContext,
        dashboard::{DashboardData, DashboardQuery},
    },
};

// GET /api/painel
#[utoipa::path(
    get,
    path = "/api/painel",
    tag = "Painel",
    params(DashboardQuery),
    responses(
        (status = 200, description = "Indicadores de compras do período", body = DashboardData),
        (status = 401, description = "Não autorizado")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_dashboard(
    State(app_state): State<AppState>,
    _ctx: RequestContext,
    Query(query): Query<DashboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    let data = app_state.dashboard_service.summary(&query).await?;
    Ok((StatusCode::OK, Json(data)))
}
