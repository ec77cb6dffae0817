// src/middleware/auth.rs

use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::{
    common::error::AppError,
    config::AppState,
    models::auth::{Claims, RequestContext},
};

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Valida o JWT emitido pelo provedor de identidade e monta o contexto da requisição.
pub fn decode_context(token: &str, secret: &str) -> Result<RequestContext, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("JWT rejeitado: {}", e);
        AppError::InvalidToken
    })?;
    Ok(token_data.claims.into())
}

// Extrator obrigatório: sem token válido a rota responde 401
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers).ok_or(AppError::InvalidToken)?;
        decode_context(token, &app_state.jwt_secret)
    }
}

// Extrator opcional (`Option<RequestContext>`): sem cabeçalho é `None`,
// cabeçalho com token inválido continua sendo 401
impl<S> OptionalFromRequestParts<S> for RequestContext
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Ok(None);
        };
        let app_state = AppState::from_ref(state);
        decode_context(token, &app_state.jwt_secret).map(Some)
    }
}
