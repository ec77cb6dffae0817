// src/handlers/quotes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    common::{db_utils::retry_on_conflict, error::AppError},
    config::AppState,
    db::QuoteFilter,
    middleware::rbac::{Comprador, RequireRole},
    models::quote::{ConcludeQuotePayload, NewBidPayload, Quote, QuoteDetail, QuoteStatus, SupplierBid},
    services::requisition_service::QuotingConcluded,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct QuoteListQuery {
    #[serde(alias = "compradorId", alias = "comprador_id")]
    pub buyer_id: Option<Uuid>,
    #[param(value_type = Option<String>, example = "em_andamento")]
    pub status: Option<QuoteStatus>,
    pub requisition_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/cotacoes",
    tag = "Cotações",
    params(QuoteListQuery),
    responses(
        (status = 200, body = Vec<Quote>),
        (status = 403, description = "Apenas compradores")
    ),
    security(("api_jwt" = []))
)]
pub async fn list_quotes(
    State(app_state): State<AppState>,
    _guard: RequireRole<Comprador>,
    Query(query): Query<QuoteListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = QuoteFilter {
        requisition_id: query.requisition_id,
        buyer_id: query.buyer_id,
        status: query.status,
    };
    let quotes = app_state.quote_service.list(&filter).await?;
    Ok((StatusCode::OK, Json(quotes)))
}

#[utoipa::path(
    get,
    path = "/api/cotacoes/{id}",
    tag = "Cotações",
    params(("id" = Uuid, Path, description = "ID da cotação")),
    responses(
        (status = 200, description = "Cotação com propostas, requisição e comprador", body = QuoteDetail),
        (status = 404, description = "Cotação não encontrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_quote(
    State(app_state): State<AppState>,
    _guard: RequireRole<Comprador>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = app_state.quote_service.detail(id).await?;
    Ok((StatusCode::OK, Json(detail)))
}

#[utoipa::path(
    post,
    path = "/api/cotacoes/{id}/fornecedores",
    tag = "Cotações",
    params(("id" = Uuid, Path, description = "ID da cotação")),
    request_body = NewBidPayload,
    responses(
        (status = 201, description = "Proposta registrada", body = SupplierBid),
        (status = 400, description = "Proposta inválida"),
        (status = 409, description = "Cotação encerrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn register_bid(
    State(app_state): State<AppState>,
    guard: RequireRole<Comprador>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NewBidPayload>,
) -> Result<impl IntoResponse, AppError> {
    let bid = retry_on_conflict(|| {
        app_state.quote_service.register_bid(&guard.ctx, id, payload.clone())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(bid)))
}

#[utoipa::path(
    post,
    path = "/api/cotacoes/{id}/concluir",
    tag = "Cotações",
    params(("id" = Uuid, Path, description = "ID da cotação")),
    request_body = ConcludeQuotePayload,
    responses(
        (status = 200, description = "Cotação concluída; vencedor escolhido pelo menor valor", body = QuotingConcluded),
        (status = 409, description = "Cotação já concluída ou requisição fora de cotação"),
        (status = 422, description = "Menos de 2 propostas válidas")
    ),
    security(("api_jwt" = []))
)]
pub async fn conclude_quote(
    State(app_state): State<AppState>,
    guard: RequireRole<Comprador>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConcludeQuotePayload>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = retry_on_conflict(|| {
        app_state.requisition_service.conclude_quoting(&guard.ctx, id, payload.clone())
    })
    .await?;
    Ok((StatusCode::OK, Json(outcome)))
}
