// src/models/approval.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{requisition::Requisition, tier::Tier};

// --- Enums ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "approval_status")]
pub enum ApprovalStatus {
    #[serde(rename = "pendente")]
    #[sqlx(rename = "pendente")]
    Pending,
    #[serde(rename = "aprovada")]
    #[sqlx(rename = "aprovada")]
    Approved,
    #[serde(rename = "rejeitada")]
    #[sqlx(rename = "rejeitada")]
    Rejected,
    #[serde(rename = "expirada")]
    #[sqlx(rename = "expirada")]
    Expired,
}

/// Decisão do aprovador: só os dois estados finais "de mérito".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Decision {
    #[serde(rename = "aprovada")]
    Approve,
    #[serde(rename = "rejeitada")]
    Reject,
}

impl From<Decision> for ApprovalStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }
}

// --- Structs ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: Uuid,
    // Referência fraca (sem FK): a requisição é buscada numa segunda consulta
    pub requisition_id: Uuid,
    pub approver_id: Option<Uuid>,
    #[schema(example = "Marcos Pereira")]
    pub approver_name: String,
    pub approver_email: String,
    #[schema(value_type = i16, example = 2)]
    pub level: Tier,
    pub status: ApprovalStatus,
    // Credencial de uso único enviada no link ao aprovador
    pub token: String,
    pub observation: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }
}

/// Aprovador cadastrado com sua alçada.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Approver {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[schema(value_type = i16)]
    pub tier: Tier,
    pub active: bool,
}

/// Aprovação pendente mesclada com a requisição (quando encontrada).
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    #[serde(flatten)]
    pub approval: Approval,
    pub requisition: Option<Requisition>,
}

// --- Payloads ---

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPayload {
    #[validate(length(min = 1, message = "O token é obrigatório."))]
    pub token: String,

    #[serde(alias = "decisao")]
    pub decision: Decision,

    #[validate(length(max = 2000, message = "A observação deve ter no máximo 2000 caracteres."))]
    #[serde(alias = "observacao")]
    pub observation: Option<String>,
}
