// src/handlers/approvals.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::{
    common::{db_utils::retry_on_conflict, error::AppError},
    config::AppState,
    middleware::rbac::{Aprovador, RequireRole},
    models::{
        approval::{DecisionPayload, PendingApproval},
        auth::RequestContext,
    },
    services::approval_service::DecisionOutcome,
};

// GET /api/aprovacoes/pendentes
#[utoipa::path(
    get,
    path = "/api/aprovacoes/pendentes",
    tag = "Aprovações",
    responses(
        (status = 200, description = "Aprovações pendentes dentro da alçada do usuário", body = Vec<PendingApproval>),
        (status = 403, description = "Apenas aprovadores")
    ),
    security(("api_jwt" = []))
)]
pub async fn list_pending(
    State(app_state): State<AppState>,
    guard: RequireRole<Aprovador>,
) -> Result<impl IntoResponse, AppError> {
    let pending = app_state.approval_service.pending_for(&guard.ctx).await?;
    Ok((StatusCode::OK, Json(pending)))
}

// GET /api/aprovacoes/token/{token}
// Público: quem tem o link pode ver o que vai decidir
#[utoipa::path(
    get,
    path = "/api/aprovacoes/token/{token}",
    tag = "Aprovações",
    params(("token" = String, Path, description = "Token do link de aprovação")),
    responses(
        (status = 200, body = PendingApproval),
        (status = 404, description = "Token não encontrado")
    )
)]
pub async fn get_by_token(
    State(app_state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let approval = app_state.approval_service.find_by_token(&token).await?;
    Ok((StatusCode::OK, Json(approval)))
}

// POST /api/aprovacoes/decisao
// O token autoriza a decisão; se houver usuário logado, a alçada dele também é conferida
#[utoipa::path(
    post,
    path = "/api/aprovacoes/decisao",
    tag = "Aprovações",
    request_body = DecisionPayload,
    responses(
        (status = 200, description = "Decisão registrada (pode trazer 'aviso')", body = DecisionOutcome),
        (status = 404, description = "Token não encontrado"),
        (status = 409, description = "Token já utilizado"),
        (status = 410, description = "Token expirado")
    ),
    security((), ("api_jwt" = []))
)]
pub async fn process_decision(
    State(app_state): State<AppState>,
    actor: Option<RequestContext>,
    Json(payload): Json<DecisionPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let outcome = retry_on_conflict(|| {
        app_state.approval_service.process_decision(
            &payload.token,
            payload.decision,
            payload.observation.clone(),
            actor.as_ref(),
        )
    })
    .await?;
    Ok((StatusCode::OK, Json(outcome)))
}
