// src/services/approval_service.rs

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    common::error::{serialize_warning, AppError},
    db::{ApprovalFilter, ApprovalUpdate, PurchasingStore},
    models::{
        approval::{Approval, ApprovalStatus, Decision, PendingApproval},
        auth::RequestContext,
        requisition::Requisition,
    },
    services::requisition_service::RequisitionService,
};

/// Resultado de uma decisão. A decisão vale mesmo quando a requisição não
/// pôde ser atualizada; nesse caso o motivo vem em `warning`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub approval: Approval,
    pub requisition: Option<Requisition>,
    #[serde(rename = "aviso", skip_serializing_if = "Option::is_none", serialize_with = "serialize_warning")]
    #[schema(value_type = Option<String>)]
    pub warning: Option<AppError>,
}

#[derive(Clone)]
pub struct ApprovalService {
    store: Arc<dyn PurchasingStore>,
    requisitions: RequisitionService,
}

impl ApprovalService {
    pub fn new(store: Arc<dyn PurchasingStore>, requisitions: RequisitionService) -> Self {
        Self { store, requisitions }
    }

    /// Processa a decisão vinda do link do aprovador. Cada token é consumido uma única vez.
    ///
    /// `actor` é o usuário autenticado, quando houver: nesse caso a alçada dele
    /// precisa cobrir a alçada da aprovação.
    pub async fn process_decision(
        &self,
        token: &str,
        decision: Decision,
        observation: Option<String>,
        actor: Option<&RequestContext>,
    ) -> Result<DecisionOutcome, AppError> {
        // 1. Token existe?
        let approval = self
            .store
            .get_approval_by_token(token)
            .await?
            .ok_or(AppError::TokenNotFound)?;

        // 2. Ainda pendente?
        if approval.status != ApprovalStatus::Pending {
            return Err(AppError::TokenAlreadyUsed);
        }

        // 3. Dentro do prazo? Se não, marca como expirada antes de recusar
        let now = Utc::now();
        if approval.is_overdue(now) {
            let update = ApprovalUpdate {
                status: ApprovalStatus::Expired,
                observation: None,
                decided_at: now,
            };
            return match self
                .store
                .update_approval_status(approval.id, ApprovalStatus::Pending, &update)
                .await
            {
                Ok(_) => {
                    tracing::warn!(aprovacao = %approval.id, "Token expirado");
                    Err(AppError::TokenExpired)
                }
                Err(e) if e.is_conflict() => Err(AppError::TokenAlreadyUsed),
                Err(e) => Err(e),
            };
        }

        // 4. Alçada de quem está decidindo
        if let Some(actor) = actor {
            if !actor.can_approve(approval.level) {
                return Err(AppError::Forbidden(format!(
                    "sua alçada não cobre {}",
                    approval.level
                )));
            }
        }

        // 5. Consumo do token: só um chamador vence o compare-and-swap
        let update = ApprovalUpdate {
            status: decision.into(),
            observation,
            decided_at: now,
        };
        let approval = self
            .store
            .update_approval_status(approval.id, ApprovalStatus::Pending, &update)
            .await
            .map_err(|e| if e.is_conflict() { AppError::TokenAlreadyUsed } else { e })?;

        tracing::info!(
            aprovacao = %approval.id,
            aprovador = %approval.approver_name,
            decisao = ?approval.status,
            "Decisão registrada"
        );

        // 6. Requisição (referência fraca)
        let Some(requisition) = self.store.get_requisition(approval.requisition_id).await? else {
            let warning = AppError::OrphanedReference {
                entity: "Requisição",
                id: approval.requisition_id,
            };
            tracing::warn!(aprovacao = %approval.id, "{}", warning);
            return Ok(DecisionOutcome { approval, requisition: None, warning: Some(warning) });
        };

        // A primeira decisão resolve: as demais aprovações expiram junto com a transição
        let siblings_observation = Some(format!("Decidida por {}", approval.approver_name));
        match self
            .requisitions
            .decide(requisition, decision, now, siblings_observation)
            .await
        {
            Ok(result) => {
                if result.expired_approvals > 0 {
                    tracing::info!(
                        requisicao = %result.requisition.number,
                        expiradas = result.expired_approvals,
                        "Aprovações restantes expiradas"
                    );
                }
                Ok(DecisionOutcome { approval, requisition: Some(result.requisition), warning: None })
            }
            Err(e) => {
                // O token já foi consumido: a decisão vale, a falha vira aviso
                tracing::warn!(aprovacao = %approval.id, erro = %e, "Decisão registrada sem efeito na requisição");
                Ok(DecisionOutcome { approval, requisition: None, warning: Some(e) })
            }
        }
    }

    /// Visualização do link antes da decisão (não consome o token).
    pub async fn find_by_token(&self, token: &str) -> Result<PendingApproval, AppError> {
        let approval = self
            .store
            .get_approval_by_token(token)
            .await?
            .ok_or(AppError::TokenNotFound)?;
        let requisition = self.store.get_requisition(approval.requisition_id).await?;
        Ok(PendingApproval { approval, requisition })
    }

    /// Aprovações pendentes que o usuário pode decidir, com a requisição de cada uma.
    pub async fn pending_for(&self, ctx: &RequestContext) -> Result<Vec<PendingApproval>, AppError> {
        let filter = ApprovalFilter {
            requisition_id: None,
            status: Some(ApprovalStatus::Pending),
        };
        let approvals = self.store.list_approvals(&filter).await?;

        let mut pending = Vec::new();
        for approval in approvals {
            if !ctx.is_admin() && !ctx.can_approve(approval.level) {
                continue;
            }
            let requisition = self.store.get_requisition(approval.requisition_id).await?;
            pending.push(PendingApproval { approval, requisition });
        }
        Ok(pending)
    }
}
