// src/middleware/rbac.rs

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use std::marker::PhantomData;

use crate::{
    common::error::AppError,
    config::AppState,
    models::auth::{RequestContext, Role},
};

/// 1. O Trait que define o papel mínimo de uma rota
pub trait RoleDef: Send + Sync + 'static {
    fn minimum() -> Role;
}

/// 2. O Extractor (Guardião). Entrega o contexto já validado ao handler.
pub struct RequireRole<T> {
    pub ctx: RequestContext,
    _role: PhantomData<T>,
}

// 3. Implementação do FromRequestParts

impl<T, S> FromRequestParts<S> for RequireRole<T>
where
    T: RoleDef,
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // A. Usuário autenticado (401 se faltar)
        let ctx = <RequestContext as FromRequestParts<S>>::from_request_parts(parts, state).await?;

        // B. Hierarquia de papéis (403 se não alcançar)
        ctx.require_role(T::minimum())?;

        Ok(RequireRole { ctx, _role: PhantomData })
    }
}

// ---
// DEFINIÇÃO DOS PAPÉIS (TIPOS)
// ---

pub struct Comprador;
impl RoleDef for Comprador {
    fn minimum() -> Role { Role::Comprador }
}

pub struct Aprovador;
impl RoleDef for Aprovador {
    fn minimum() -> Role { Role::Aprovador }
}

pub struct Requisitante;
impl RoleDef for Requisitante {
    fn minimum() -> Role { Role::Requisitante }
}
