// src/models/auth.rs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::models::tier::Tier;

// Papéis do sistema. Hierarquia numérica: quanto maior, mais acesso.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Gerente,
    Aprovador,
    Comprador,
    Requisitante,
    Visitante,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Admin => 5,
            Role::Gerente => 4,
            Role::Aprovador => 3,
            Role::Comprador => 2,
            Role::Requisitante => 1,
            Role::Visitante => 0,
        }
    }

    pub fn at_least(self, other: Role) -> bool {
        self.rank() >= other.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Admin => "Administrador",
            Role::Gerente => "Gerente",
            Role::Aprovador => "Aprovador",
            Role::Comprador => "Comprador",
            Role::Requisitante => "Requisitante",
            Role::Visitante => "Visitante",
        }
    }
}

// Estrutura de dados ("claims") dentro do JWT emitido pelo provedor de identidade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,  // Subject (ID do usuário)
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default = "default_alcada")]
    pub alcada: Tier,
    pub exp: usize, // Expiration time (quando o token expira)
    #[serde(default)]
    pub iat: usize, // Issued At (quando o token foi criado)
}

fn default_alcada() -> Tier {
    Tier::Unassigned
}

/// Contexto da requisição: quem está chamando, com qual papel e alçada.
/// É passado explicitamente para toda operação do núcleo que exige autorização.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub tier: Tier,
}

impl RequestContext {
    pub fn new(user_id: Uuid, name: impl Into<String>, role: Role, tier: Tier) -> Self {
        Self {
            user_id,
            name: name.into(),
            email: String::new(),
            role,
            tier,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// O usuário pode decidir uma aprovação cuja alçada exigida é `level`.
    pub fn can_approve(&self, level: Tier) -> bool {
        self.tier >= level
    }

    pub fn require_role(&self, minimum: Role) -> Result<(), AppError> {
        if self.role.at_least(minimum) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "é necessário o papel '{}' ou superior",
                minimum.label()
            )))
        }
    }
}

impl From<Claims> for RequestContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            name: claims.name,
            email: claims.email,
            role: claims.role,
            tier: claims.alcada,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_hierarchy_matches_rank() {
        assert!(Role::Admin.at_least(Role::Gerente));
        assert!(Role::Comprador.at_least(Role::Requisitante));
        assert!(!Role::Requisitante.at_least(Role::Comprador));
        assert!(Role::Visitante.at_least(Role::Visitante));
    }

    #[test]
    fn approver_needs_enough_authority() {
        let ctx = RequestContext::new(Uuid::new_v4(), "Ana", Role::Aprovador, Tier::Manager);
        assert!(ctx.can_approve(Tier::Coordinator));
        assert!(ctx.can_approve(Tier::Manager));
        assert!(!ctx.can_approve(Tier::Director));
    }

    #[test]
    fn require_role_rejects_lower_roles() {
        let ctx = RequestContext::new(Uuid::new_v4(), "Rui", Role::Requisitante, Tier::Unassigned);
        assert!(ctx.require_role(Role::Requisitante).is_ok());
        assert!(matches!(ctx.require_role(Role::Comprador), Err(AppError::Forbidden(_))));
    }
}
