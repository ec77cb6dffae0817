// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serializer;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    requisition::RequisitionStatus,
    tier::Tier,
};
use crate::services::workflow::WorkflowEvent;

// Taxonomia de erros do módulo de compras.
// As variantes de negócio carregam contexto suficiente para a mensagem ao usuário.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Valor inválido: {0}")]
    InvalidValue(String),

    #[error("Cotação precisa de no mínimo 2 fornecedores válidos (recebidos: {valid})")]
    InsufficientBids { valid: usize },

    #[error("Transição inválida: '{event}' não é permitida a partir de '{from}'")]
    InvalidTransition {
        from: RequisitionStatus,
        event: WorkflowEvent,
    },

    #[error("Token de aprovação não encontrado")]
    TokenNotFound,

    #[error("Token de aprovação já utilizado")]
    TokenAlreadyUsed,

    #[error("Token de aprovação expirado")]
    TokenExpired,

    #[error("Conflito de concorrência em {0}")]
    Conflict(String),

    #[error("{entity} {id} não encontrada (referência órfã)")]
    OrphanedReference { entity: &'static str, id: Uuid },

    #[error("{entity} {id} não encontrado(a)")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Campos obrigatórios ausentes: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Nenhum aprovador disponível para a alçada {0} ou superior")]
    NoApproverAvailable(Tier),

    #[error("Acesso negado: {0}")]
    Forbidden(String),

    #[error("Token inválido")]
    InvalidToken,

    // Variante para erros de banco de dados
    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        AppError::NotFound { entity, id }
    }

    pub fn negative_value(value: Decimal) -> Self {
        AppError::InvalidValue(format!("o valor estimado não pode ser negativo ({value})"))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }
}

/// Avisos de sucesso parcial saem no JSON como texto (campo `aviso`).
pub fn serialize_warning<S: Serializer>(warning: &Option<AppError>, serializer: S) -> Result<S::Ok, S::Error> {
    match warning {
        Some(err) => serializer.serialize_str(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            // Retorna todos os detalhes da validação.
            AppError::ValidationError(errors) => {
                let mut details = std::collections::HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<String> = field_errors.iter()
                        .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                let body = Json(json!({
                    "error": "Um ou mais campos são inválidos.",
                    "details": details,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            AppError::InvalidValue(_) | AppError::MissingFields(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientBids { .. } | AppError::NoApproverAvailable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::InvalidTransition { .. }
            | AppError::TokenAlreadyUsed
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TokenNotFound
            | AppError::NotFound { .. }
            | AppError::OrphanedReference { .. } => StatusCode::NOT_FOUND,
            AppError::TokenExpired => StatusCode::GONE,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidToken => StatusCode::UNAUTHORIZED,

            // Erros internos: o `tracing` registra o detalhe, o cliente recebe mensagem genérica.
            AppError::DatabaseError(e) => {
                tracing::error!("Erro de banco de dados: {:?}", e);
                let body = Json(json!({ "error": "Ocorreu um erro inesperado." }));
                return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
            }
            AppError::InternalServerError(e) => {
                tracing::error!("Erro Interno do Servidor: {:?}", e);
                let body = Json(json!({ "error": "Ocorreu um erro inesperado." }));
                return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
            }
        };

        // Resposta padrão para erros de negócio que só têm uma mensagem.
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
