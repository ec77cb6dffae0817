// src/handlers/requisitions.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    common::{db_utils::retry_on_conflict, error::AppError},
    config::AppState,
    db::RequisitionFilter,
    middleware::rbac::{Comprador, RequireRole},
    models::{
        auth::RequestContext,
        quote::RouteForQuotingPayload,
        requisition::{NewRequisitionPayload, Requisition, RequisitionStatus, ReviseRequisitionPayload},
    },
    services::requisition_service::{RoutedForApproval, RoutedForQuoting},
};

// ---
// Query: filtros da listagem
// ---
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct RequisitionListQuery {
    #[param(value_type = Option<String>, example = "em_aprovacao")]
    pub status: Option<RequisitionStatus>,
    /// Trecho da descrição ou do número
    #[serde(alias = "busca")]
    pub search: Option<String>,
    #[serde(alias = "obraId", alias = "obra_id")]
    pub work_site_id: Option<String>,
    pub buyer_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl From<RequisitionListQuery> for RequisitionFilter {
    fn from(query: RequisitionListQuery) -> Self {
        RequisitionFilter {
            status: query.status,
            work_site_id: query.work_site_id,
            buyer_id: query.buyer_id,
            search: query.search.filter(|s| !s.trim().is_empty()),
            created_after: None,
            limit: query.limit,
        }
    }
}

// ---
// Payload: cancelamento
// ---
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequisitionPayload {
    #[serde(default, alias = "motivo")]
    pub reason: Option<String>,
}

// ---
// Handler: create_requisition
// ---
#[utoipa::path(
    post,
    path = "/api/requisicoes",
    tag = "Requisições",
    request_body = NewRequisitionPayload,
    responses(
        (status = 201, description = "Requisição criada (pendente ou rascunho)", body = Requisition),
        (status = 400, description = "Dados inválidos"),
        (status = 401, description = "Não autorizado")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_requisition(
    State(app_state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<NewRequisitionPayload>,
) -> Result<impl IntoResponse, AppError> {
    let requisition = retry_on_conflict(|| {
        app_state.requisition_service.create(&ctx, payload.clone())
    })
    .await?;

    Ok((StatusCode::CREATED, Json(requisition)))
}

// ---
// Handler: list_requisitions
// ---
#[utoipa::path(
    get,
    path = "/api/requisicoes",
    tag = "Requisições",
    params(RequisitionListQuery),
    responses(
        (status = 200, description = "Requisições, mais recentes primeiro", body = Vec<Requisition>),
        (status = 401, description = "Não autorizado")
    ),
    security(("api_jwt" = []))
)]
pub async fn list_requisitions(
    State(app_state): State<AppState>,
    _ctx: RequestContext,
    Query(query): Query<RequisitionListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let list = app_state.requisition_service.list(&query.into()).await?;
    Ok((StatusCode::OK, Json(list)))
}

#[utoipa::path(
    get,
    path = "/api/requisicoes/{id}",
    tag = "Requisições",
    params(("id" = Uuid, Path, description = "ID da requisição")),
    responses(
        (status = 200, body = Requisition),
        (status = 404, description = "Requisição não encontrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_requisition(
    State(app_state): State<AppState>,
    _ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requisition = app_state.requisition_service.get(id).await?;
    Ok((StatusCode::OK, Json(requisition)))
}

// ---
// Handler: revise_requisition (itens e valor, antes da aprovação)
// ---
#[utoipa::path(
    put,
    path = "/api/requisicoes/{id}/itens",
    tag = "Requisições",
    params(("id" = Uuid, Path, description = "ID da requisição")),
    request_body = ReviseRequisitionPayload,
    responses(
        (status = 200, description = "Itens alterados, alçada recalculada", body = Requisition),
        (status = 409, description = "Requisição já enviada para aprovação")
    ),
    security(("api_jwt" = []))
)]
pub async fn revise_requisition(
    State(app_state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviseRequisitionPayload>,
) -> Result<impl IntoResponse, AppError> {
    let requisition = retry_on_conflict(|| {
        app_state.requisition_service.revise(&ctx, id, payload.clone())
    })
    .await?;
    Ok((StatusCode::OK, Json(requisition)))
}

// ---
// Transições
// ---

#[utoipa::path(
    post,
    path = "/api/requisicoes/{id}/submeter",
    tag = "Requisições",
    params(("id" = Uuid, Path, description = "ID da requisição")),
    responses(
        (status = 200, description = "Rascunho enviado (pendente)", body = Requisition),
        (status = 400, description = "Campos obrigatórios ausentes"),
        (status = 409, description = "Transição inválida")
    ),
    security(("api_jwt" = []))
)]
pub async fn submit_requisition(
    State(app_state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requisition = retry_on_conflict(|| app_state.requisition_service.submit(&ctx, id)).await?;
    Ok((StatusCode::OK, Json(requisition)))
}

#[utoipa::path(
    post,
    path = "/api/requisicoes/{id}/encaminhar-aprovacao",
    tag = "Requisições",
    params(("id" = Uuid, Path, description = "ID da requisição")),
    responses(
        (status = 200, description = "Em aprovação; aprovações criadas com seus tokens", body = RoutedForApproval),
        (status = 409, description = "Transição inválida"),
        (status = 422, description = "Nenhum aprovador disponível")
    ),
    security(("api_jwt" = []))
)]
pub async fn route_for_approval(
    State(app_state): State<AppState>,
    guard: RequireRole<Comprador>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let routed = retry_on_conflict(|| {
        app_state.requisition_service.route_for_approval(&guard.ctx, id)
    })
    .await?;
    Ok((StatusCode::OK, Json(routed)))
}

#[utoipa::path(
    post,
    path = "/api/requisicoes/{id}/encaminhar-cotacao",
    tag = "Requisições",
    params(("id" = Uuid, Path, description = "ID da requisição")),
    request_body = RouteForQuotingPayload,
    responses(
        (status = 200, description = "Em cotação; cotação aberta para o comprador", body = RoutedForQuoting),
        (status = 404, description = "Comprador não encontrado"),
        (status = 409, description = "Transição inválida")
    ),
    security(("api_jwt" = []))
)]
pub async fn route_for_quoting(
    State(app_state): State<AppState>,
    guard: RequireRole<Comprador>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RouteForQuotingPayload>,
) -> Result<impl IntoResponse, AppError> {
    let routed = retry_on_conflict(|| {
        app_state.requisition_service.route_for_quoting(&guard.ctx, id, payload.clone())
    })
    .await?;
    Ok((StatusCode::OK, Json(routed)))
}

#[utoipa::path(
    post,
    path = "/api/requisicoes/{id}/comprar",
    tag = "Requisições",
    params(("id" = Uuid, Path, description = "ID da requisição")),
    responses(
        (status = 200, description = "Compra efetivada", body = Requisition),
        (status = 409, description = "Transição inválida")
    ),
    security(("api_jwt" = []))
)]
pub async fn purchase_requisition(
    State(app_state): State<AppState>,
    guard: RequireRole<Comprador>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requisition = retry_on_conflict(|| app_state.requisition_service.purchase(&guard.ctx, id)).await?;
    Ok((StatusCode::OK, Json(requisition)))
}

#[utoipa::path(
    post,
    path = "/api/requisicoes/{id}/cancelar",
    tag = "Requisições",
    params(("id" = Uuid, Path, description = "ID da requisição")),
    request_body = CancelRequisitionPayload,
    responses(
        (status = 200, description = "Requisição cancelada", body = Requisition),
        (status = 403, description = "Apenas o requisitante ou gerente"),
        (status = 409, description = "Requisição já encerrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn cancel_requisition(
    State(app_state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequisitionPayload>,
) -> Result<impl IntoResponse, AppError> {
    let requisition = retry_on_conflict(|| {
        app_state.requisition_service.cancel(&ctx, id, payload.reason.clone())
    })
    .await?;
    Ok((StatusCode::OK, Json(requisition)))
}
