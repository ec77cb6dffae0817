// src/services/requisition_service.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::{serialize_warning, AppError},
    db::{
        ApprovalUpdate, ConcludedQuote, PurchasingStore, RequisitionFilter, RequisitionNumbering,
        Transition, TransitionResult,
    },
    models::{
        approval::{Approval, ApprovalStatus, Approver, Decision},
        auth::{RequestContext, Role},
        quote::{ConcludeQuotePayload, Quote, RouteForQuotingPayload},
        requisition::{
            items_total, NewRequisitionPayload, Requisition, RequisitionStatus,
            ReviseRequisitionPayload,
        },
        tier::Tier,
    },
    services::{
        authority::TierTable,
        quote_service::{savings, QuoteService},
        workflow::{next_status, WorkflowEvent},
    },
};

/// Regras configuráveis do fluxo de aprovação.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    /// Prazo de cada aprovação, em horas a partir do envio.
    pub deadline_hours: i64,
    /// Volta para aprovação quando o vencedor da cotação exige alçada maior.
    pub reescalate_after_quoting: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            deadline_hours: 48,
            reescalate_after_quoting: true,
        }
    }
}

// --- Resultados das operações ---

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutedForApproval {
    pub requisition: Requisition,
    // Cada aprovação carrega o token que será entregue ao aprovador
    pub approvals: Vec<Approval>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutedForQuoting {
    pub requisition: Requisition,
    pub quote: Quote,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotingConcluded {
    pub quote: Quote,
    pub requisition: Option<Requisition>,
    /// A proposta vencedora exigiu alçada maior: a requisição voltou para aprovação.
    pub reapproval: bool,
    pub approvals: Vec<Approval>,
    pub savings: Option<Decimal>,
    #[serde(rename = "aviso", skip_serializing_if = "Option::is_none", serialize_with = "serialize_warning")]
    #[schema(value_type = Option<String>)]
    pub warning: Option<AppError>,
}

#[derive(Clone)]
pub struct RequisitionService {
    store: Arc<dyn PurchasingStore>,
    numbering: Arc<dyn RequisitionNumbering>,
    tiers: TierTable,
    policy: ApprovalPolicy,
    quotes: QuoteService,
}

impl RequisitionService {
    pub fn new(
        store: Arc<dyn PurchasingStore>,
        numbering: Arc<dyn RequisitionNumbering>,
        tiers: TierTable,
        policy: ApprovalPolicy,
    ) -> Self {
        let quotes = QuoteService::new(store.clone());
        Self { store, numbering, tiers, policy, quotes }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    // =========================================================================
    //  CRIAÇÃO E EDIÇÃO
    // =========================================================================

    pub async fn create(
        &self,
        ctx: &RequestContext,
        payload: NewRequisitionPayload,
    ) -> Result<Requisition, AppError> {
        ctx.require_role(Role::Requisitante)?;
        payload.validate()?;

        // 1. Valor: a soma dos itens manda; sem itens, vale o valor informado
        let estimated_value = if payload.items.is_empty() {
            payload.estimated_value.unwrap_or_default()
        } else {
            items_total(&payload.items)?
        };
        let approval_tier = self.tiers.resolve(estimated_value)?;

        // 2. Numeração
        let now = Utc::now();
        let number = self.numbering.next_number(now).await?;

        let requester_name = match payload.requester_name.trim() {
            "" => ctx.name.clone(),
            name => name.to_string(),
        };

        let mut requisition = Requisition {
            id: Uuid::new_v4(),
            number,
            requester_id: Some(ctx.user_id),
            requester_name,
            work_site_id: payload.work_site_id,
            work_site_name: payload.work_site_name.trim().to_string(),
            description: payload.description.trim().to_string(),
            justification: payload.justification,
            urgency: payload.urgency,
            category: payload.category,
            estimated_value,
            status: RequisitionStatus::Draft,
            approval_tier,
            buyer_id: None,
            original_text: payload.original_text,
            needed_by: payload.needed_by,
            approval_requested_at: None,
            approval_resolved_at: None,
            created_at: now,
            updated_at: now,
            items: payload.items,
        };

        // 3. Completa e não marcada como rascunho: já nasce pendente
        if !payload.draft && requisition.missing_fields().is_empty() {
            requisition.status = next_status(RequisitionStatus::Draft, WorkflowEvent::Submit)?;
        }

        let saved = self.store.create_requisition(&requisition).await?;
        tracing::info!(
            requisicao = %saved.number,
            valor = %saved.estimated_value,
            alcada = saved.approval_tier.level(),
            status = %saved.status,
            "Requisição criada"
        );
        Ok(saved)
    }

    /// Altera itens/valor enquanto a requisição não foi enviada para aprovação.
    /// A alçada é recalculada a cada alteração.
    pub async fn revise(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        payload: ReviseRequisitionPayload,
    ) -> Result<Requisition, AppError> {
        payload.validate()?;
        let current = self.get(id).await?;
        Self::require_owner_or_manager(ctx, &current)?;

        let (items, estimated_value) = if !payload.items.is_empty() {
            let total = items_total(&payload.items)?;
            (payload.items, total)
        } else if let Some(value) = payload.estimated_value {
            (Vec::new(), value)
        } else {
            (current.items.clone(), current.estimated_value)
        };
        let approval_tier = self.tiers.resolve(estimated_value)?;

        self.apply(current, WorkflowEvent::Revise, move |r| {
            r.items = items;
            r.estimated_value = estimated_value;
            r.approval_tier = approval_tier;
            if let Some(description) = payload.description {
                r.description = description.trim().to_string();
            }
            if payload.justification.is_some() {
                r.justification = payload.justification;
            }
            if let Some(urgency) = payload.urgency {
                r.urgency = urgency;
            }
        })
        .await
    }

    // =========================================================================
    //  TRANSIÇÕES
    // =========================================================================

    pub async fn submit(&self, ctx: &RequestContext, id: Uuid) -> Result<Requisition, AppError> {
        let current = self.get(id).await?;
        Self::require_owner_or_manager(ctx, &current)?;

        // O estado é checado antes dos campos: enviar duas vezes é transição inválida
        next_status(current.status, WorkflowEvent::Submit)?;
        let missing = current.missing_fields();
        if !missing.is_empty() {
            return Err(AppError::MissingFields(missing));
        }

        self.apply(current, WorkflowEvent::Submit, |_| {}).await
    }

    pub async fn route_for_approval(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<RoutedForApproval, AppError> {
        ctx.require_role(Role::Comprador)?;
        let current = self.get(id).await?;
        next_status(current.status, WorkflowEvent::RouteForApproval)?;

        // 1. Alçada resolvida uma única vez, na entrada em aprovação
        let tier = self.tiers.resolve(current.estimated_value)?;
        let approvers = self.pick_approvers(tier).await?;

        // 2. Transição e aprovações (uma por aprovador, com token próprio) gravadas juntas
        let now = Utc::now();
        let event = WorkflowEvent::RouteForApproval;
        let mut transition = Self::transition(current, event, move |r| {
            r.approval_tier = tier;
            r.approval_requested_at = Some(now);
            r.approval_resolved_at = None;
        })?;
        transition.effects.new_approvals =
            self.new_approvals(transition.requisition.id, tier, &approvers, now);

        let result = self.commit(&transition, event).await?;
        tracing::info!(
            requisicao = %result.requisition.number,
            aprovadores = result.approvals.len(),
            alcada = tier.level(),
            "Aprovações criadas"
        );
        Ok(RoutedForApproval { requisition: result.requisition, approvals: result.approvals })
    }

    pub async fn route_for_quoting(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        payload: RouteForQuotingPayload,
    ) -> Result<RoutedForQuoting, AppError> {
        ctx.require_role(Role::Comprador)?;

        let buyer = self
            .store
            .get_buyer(payload.buyer_id)
            .await?
            .filter(|b| b.active)
            .ok_or_else(|| AppError::not_found("Comprador", payload.buyer_id))?;

        let current = self.get(id).await?;
        let event = WorkflowEvent::RouteForQuoting;
        let mut transition = Self::transition(current, event, move |r| {
            r.buyer_id = Some(buyer.id);
        })?;
        transition.effects.open_quote = Some(QuoteService::new_quote(
            transition.requisition.id,
            payload.buyer_id,
            payload.deadline,
            transition.requisition.updated_at,
        ));

        let result = self.commit(&transition, event).await?;
        let quote = result.opened_quote.ok_or_else(|| {
            AppError::InternalServerError(anyhow::anyhow!("cotação não devolvida pelo store"))
        })?;
        tracing::info!(requisicao = %result.requisition.number, cotacao = %quote.id, "Cotação aberta");

        Ok(RoutedForQuoting { requisition: result.requisition, quote })
    }

    /// Conclui a cotação e devolve a requisição para `aprovada`, ou para
    /// `em_aprovacao` quando o vencedor exige alçada maior que a aprovada.
    /// Cotação, requisição e novas aprovações são gravadas numa só operação.
    pub async fn conclude_quoting(
        &self,
        ctx: &RequestContext,
        quote_id: Uuid,
        payload: ConcludeQuotePayload,
    ) -> Result<QuotingConcluded, AppError> {
        ctx.require_role(Role::Comprador)?;

        let quote = self.quotes.get(quote_id).await?;
        let requisition = self.store.get_requisition(quote.requisition_id).await?;

        // 1. Requisição precisa estar em cotação (checado antes de gravar qualquer coisa)
        if let Some(r) = &requisition {
            next_status(r.status, WorkflowEvent::ConcludeQuoting { reapproval: false })?;
        }

        // 2. Vencedor e re-escalonamento
        let now = Utc::now();
        let conclusion =
            QuoteService::prepare_conclusion(quote, payload.bids, payload.observation, now)?;
        let winner_value = conclusion.winner_value();
        let winner_tier = self.tiers.resolve(winner_value)?;

        let reapproval = self.policy.reescalate_after_quoting
            && requisition.as_ref().is_some_and(|r| winner_tier > r.approval_tier);
        let estimated = requisition.as_ref().map(|r| r.estimated_value);
        let event = WorkflowEvent::ConcludeQuoting { reapproval };

        // 3. Transição da requisição (ausente se ela sumiu)
        let transition = match requisition {
            Some(current) => {
                let mut transition = Self::transition(current, event, move |r| {
                    if reapproval {
                        r.approval_tier = winner_tier;
                        r.approval_requested_at = Some(now);
                        r.approval_resolved_at = None;
                    }
                })?;
                if reapproval {
                    let approvers = self.pick_approvers(winner_tier).await?;
                    transition.effects.new_approvals =
                        self.new_approvals(transition.requisition.id, winner_tier, &approvers, now);
                }
                Some(transition)
            }
            None => None,
        };
        let from = transition.as_ref().map(|t| t.expected);

        // 4. Grava tudo de uma vez
        let ConcludedQuote { quote, transition } =
            self.quotes.commit_conclusion(conclusion, transition).await?;

        let (Some(result), Some(from)) = (transition, from) else {
            let warning = AppError::OrphanedReference {
                entity: "Requisição",
                id: quote.requisition_id,
            };
            tracing::warn!(cotacao = %quote.id, "{}", warning);
            return Ok(QuotingConcluded {
                quote,
                requisition: None,
                reapproval: false,
                approvals: Vec::new(),
                savings: None,
                warning: Some(warning),
            });
        };

        Self::log_transition(&result.requisition, from, event);
        if reapproval {
            tracing::info!(
                requisicao = %result.requisition.number,
                alcada = winner_tier.level(),
                aprovadores = result.approvals.len(),
                "Vencedor acima da alçada aprovada: nova aprovação"
            );
        }

        Ok(QuotingConcluded {
            quote,
            requisition: Some(result.requisition),
            reapproval,
            approvals: result.approvals,
            savings: estimated.map(|estimated| savings(estimated, winner_value)),
            warning: None,
        })
    }

    pub async fn purchase(&self, ctx: &RequestContext, id: Uuid) -> Result<Requisition, AppError> {
        ctx.require_role(Role::Comprador)?;
        let current = self.get(id).await?;
        self.apply(current, WorkflowEvent::Purchase, |_| {}).await
    }

    /// Cancela a requisição. Aprovações pendentes expiram e a cotação aberta é
    /// cancelada, na mesma gravação da transição.
    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<Requisition, AppError> {
        let current = self.get(id).await?;
        Self::require_owner_or_manager(ctx, &current)?;

        let event = WorkflowEvent::Cancel;
        let mut transition = Self::transition(current, event, |_| {})?;
        let observation = match &reason {
            Some(reason) => format!("Requisição cancelada: {reason}"),
            None => "Requisição cancelada".to_string(),
        };
        transition.effects.expire_pending = Some(ApprovalUpdate {
            status: ApprovalStatus::Expired,
            observation: Some(observation),
            decided_at: transition.requisition.updated_at,
        });
        transition.effects.cancel_open_quote = true;

        let result = self.commit(&transition, event).await?;
        tracing::info!(
            requisicao = %result.requisition.number,
            motivo = ?reason,
            aprovacoes_expiradas = result.expired_approvals,
            cotacao = ?result.cancelled_quote.as_ref().map(|q| q.id),
            "Requisição cancelada"
        );
        Ok(result.requisition)
    }

    /// Aprovação/rejeição: só o processador de tokens chega aqui. As demais
    /// aprovações pendentes expiram na mesma gravação da transição.
    pub(crate) async fn decide(
        &self,
        current: Requisition,
        decision: Decision,
        decided_at: DateTime<Utc>,
        siblings_observation: Option<String>,
    ) -> Result<TransitionResult, AppError> {
        let event = match decision {
            Decision::Approve => WorkflowEvent::Approve,
            Decision::Reject => WorkflowEvent::Reject,
        };
        let mut transition = Self::transition(current, event, move |r| {
            r.approval_resolved_at = Some(decided_at);
        })?;
        transition.effects.expire_pending = Some(ApprovalUpdate {
            status: ApprovalStatus::Expired,
            observation: siblings_observation,
            decided_at,
        });
        self.commit(&transition, event).await
    }

    // =========================================================================
    //  LEITURA
    // =========================================================================

    pub async fn get(&self, id: Uuid) -> Result<Requisition, AppError> {
        self.store
            .get_requisition(id)
            .await?
            .ok_or_else(|| AppError::not_found("Requisição", id))
    }

    pub async fn list(&self, filter: &RequisitionFilter) -> Result<Vec<Requisition>, AppError> {
        self.store.list_requisitions(filter).await
    }

    // =========================================================================
    //  HELPERS
    // =========================================================================

    /// Monta a transição `event` sobre `current`: valida na tabela de
    /// transições e aplica `mutate`. Nada é gravado aqui.
    fn transition<F>(mut current: Requisition, event: WorkflowEvent, mutate: F) -> Result<Transition, AppError>
    where
        F: FnOnce(&mut Requisition),
    {
        let from = current.status;
        current.status = next_status(from, event)?;
        current.updated_at = Utc::now();
        mutate(&mut current);
        Ok(Transition::new(from, current))
    }

    /// Grava a transição com seus efeitos, condicionada ao status anterior.
    async fn commit(&self, transition: &Transition, event: WorkflowEvent) -> Result<TransitionResult, AppError> {
        let result = self.store.transition_requisition(transition).await?;
        Self::log_transition(&result.requisition, transition.expected, event);
        Ok(result)
    }

    async fn apply<F>(
        &self,
        current: Requisition,
        event: WorkflowEvent,
        mutate: F,
    ) -> Result<Requisition, AppError>
    where
        F: FnOnce(&mut Requisition),
    {
        let transition = Self::transition(current, event, mutate)?;
        Ok(self.commit(&transition, event).await?.requisition)
    }

    fn log_transition(requisition: &Requisition, from: RequisitionStatus, event: WorkflowEvent) {
        tracing::info!(
            requisicao = %requisition.number,
            de = %from,
            para = %requisition.status,
            evento = %event,
            "Transição aplicada"
        );
    }

    /// Aprovadores da alçada exigida; se não houver, sobe para a próxima alçada com aprovadores.
    async fn pick_approvers(&self, required: Tier) -> Result<Vec<Approver>, AppError> {
        let mut tier = Some(required);
        while let Some(current) = tier {
            let approvers = self.store.list_approvers(current).await?;
            if !approvers.is_empty() {
                if current != required {
                    tracing::warn!(
                        exigida = required.level(),
                        usada = current.level(),
                        "Sem aprovadores na alçada exigida, usando alçada superior"
                    );
                }
                return Ok(approvers);
            }
            tier = current.next();
        }
        Err(AppError::NoApproverAvailable(required))
    }

    fn new_approvals(
        &self,
        requisition_id: Uuid,
        level: Tier,
        approvers: &[Approver],
        now: DateTime<Utc>,
    ) -> Vec<Approval> {
        let deadline = now + Duration::hours(self.policy.deadline_hours);
        approvers
            .iter()
            .map(|approver| Approval {
                id: Uuid::new_v4(),
                requisition_id,
                approver_id: Some(approver.id),
                approver_name: approver.name.clone(),
                approver_email: approver.email.clone(),
                level,
                status: ApprovalStatus::Pending,
                token: Uuid::new_v4().simple().to_string(),
                observation: None,
                deadline: Some(deadline),
                decided_at: None,
                created_at: now,
            })
            .collect()
    }

    fn require_owner_or_manager(ctx: &RequestContext, requisition: &Requisition) -> Result<(), AppError> {
        if requisition.requester_id == Some(ctx.user_id) || ctx.role.at_least(Role::Gerente) {
            return Ok(());
        }
        Err(AppError::Forbidden(
            "apenas o requisitante ou um gerente pode alterar esta requisição".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ApprovalFilter, MemoryStore, QuoteFilter};
    use crate::models::{
        quote::{Buyer, NewBidPayload, QuoteStatus},
        requisition::RequisitionItem,
    };

    fn approver(name: &str, tier: Tier) -> Approver {
        Approver {
            id: Uuid::new_v4(),
            name: name.into(),
            email: format!("{}@empresa.com", name.to_lowercase()),
            tier,
            active: true,
        }
    }

    fn service_with(store: MemoryStore) -> RequisitionService {
        let store = Arc::new(store);
        RequisitionService::new(store.clone(), store, TierTable::default(), ApprovalPolicy::default())
    }

    fn requester() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), "Carlos Silva", Role::Requisitante, Tier::Unassigned)
    }

    fn buyer() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), "Aline", Role::Comprador, Tier::Unassigned)
    }

    fn payload(items: Vec<RequisitionItem>) -> NewRequisitionPayload {
        NewRequisitionPayload {
            requester_name: String::new(),
            work_site_id: Some("FRUTAL".into()),
            work_site_name: "SE Frutal".into(),
            description: "Cabos XLPE".into(),
            justification: None,
            category: Some("eletrico".into()),
            urgency: Default::default(),
            needed_by: None,
            items,
            estimated_value: None,
            original_text: None,
            draft: false,
        }
    }

    fn bid_payload(name: &str, total: i64) -> NewBidPayload {
        NewBidPayload {
            supplier_name: name.into(),
            contact: None,
            total_value: Decimal::from(total),
            lead_time_days: None,
            payment_terms: None,
            item_prices: vec![],
        }
    }

    fn item(qty: i64, unit_cents: i64) -> RequisitionItem {
        RequisitionItem {
            description: "Cabo".into(),
            quantity: Decimal::from(qty),
            unit: "m".into(),
            unit_value: Decimal::new(unit_cents, 2),
        }
    }

    #[tokio::test]
    async fn complete_requisition_is_created_pending_with_resolved_tier() {
        let service = service_with(MemoryStore::new());
        let req = service
            .create(&requester(), payload(vec![item(500, 3850), item(20, 4500)]))
            .await
            .unwrap();

        assert_eq!(req.status, RequisitionStatus::Pending);
        assert_eq!(req.estimated_value, Decimal::from(20_150));
        assert_eq!(req.approval_tier, Tier::Manager);
        assert_eq!(req.requester_name, "Carlos Silva");
        assert!(req.number.starts_with("RC-"));
    }

    #[tokio::test]
    async fn incomplete_requisition_stays_draft_and_cannot_be_submitted() {
        let service = service_with(MemoryStore::new());
        let ctx = requester();
        let mut incomplete = payload(vec![]);
        incomplete.description = String::new();
        let req = service.create(&ctx, incomplete).await.unwrap();
        assert_eq!(req.status, RequisitionStatus::Draft);
        assert_eq!(req.approval_tier, Tier::Coordinator);

        let result = service.submit(&ctx, req.id).await;
        match result {
            Err(AppError::MissingFields(fields)) => {
                assert!(fields.contains(&"description"));
                assert!(fields.contains(&"items"));
            }
            other => panic!("esperado MissingFields, veio {other:?}"),
        }
    }

    #[tokio::test]
    async fn revise_recomputes_the_tier() {
        let service = service_with(MemoryStore::new());
        let ctx = requester();
        let req = service.create(&ctx, payload(vec![item(10, 10_000)])).await.unwrap();
        assert_eq!(req.approval_tier, Tier::Coordinator);

        let revised = service
            .revise(
                &ctx,
                req.id,
                ReviseRequisitionPayload {
                    items: vec![item(10, 1_000_000)],
                    estimated_value: None,
                    description: None,
                    justification: None,
                    urgency: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(revised.estimated_value, Decimal::from(100_000));
        assert_eq!(revised.approval_tier, Tier::Director);
        assert_eq!(revised.status, RequisitionStatus::Pending);
    }

    #[tokio::test]
    async fn routing_falls_back_to_the_next_tier_with_approvers() {
        let store = MemoryStore::new().with_approver(approver("Diretora", Tier::Director));
        let service = service_with(store);
        let req = service.create(&requester(), payload(vec![item(500, 3850), item(20, 4500)])).await.unwrap();

        let routed = service.route_for_approval(&buyer(), req.id).await.unwrap();
        assert_eq!(routed.requisition.status, RequisitionStatus::AwaitingApproval);
        assert_eq!(routed.requisition.approval_tier, Tier::Manager);
        assert_eq!(routed.approvals.len(), 1);
        assert_eq!(routed.approvals[0].approver_name, "Diretora");
        assert_eq!(routed.approvals[0].level, Tier::Manager);
        assert!(routed.requisition.approval_requested_at.is_some());
    }

    #[tokio::test]
    async fn routing_without_any_approver_fails_before_transition() {
        let service = service_with(MemoryStore::new());
        let req = service.create(&requester(), payload(vec![item(1, 1_000)])).await.unwrap();

        let result = service.route_for_approval(&buyer(), req.id).await;
        assert!(matches!(result, Err(AppError::NoApproverAvailable(Tier::Coordinator))));
        assert_eq!(service.get(req.id).await.unwrap().status, RequisitionStatus::Pending);
    }

    #[tokio::test]
    async fn purchase_before_approval_is_an_invalid_transition() {
        let service = service_with(MemoryStore::new());
        let req = service.create(&requester(), payload(vec![item(1, 1_000)])).await.unwrap();
        let result = service.purchase(&buyer(), req.id).await;
        assert!(matches!(
            result,
            Err(AppError::InvalidTransition { from: RequisitionStatus::Pending, event: WorkflowEvent::Purchase })
        ));
    }

    #[tokio::test]
    async fn only_requester_or_manager_may_cancel() {
        let service = service_with(MemoryStore::new());
        let owner = requester();
        let req = service.create(&owner, payload(vec![item(1, 1_000)])).await.unwrap();

        let stranger = requester();
        assert!(matches!(service.cancel(&stranger, req.id, None).await, Err(AppError::Forbidden(_))));

        let cancelled = service.cancel(&owner, req.id, Some("duplicada".into())).await.unwrap();
        assert_eq!(cancelled.status, RequisitionStatus::Cancelled);
        assert!(matches!(
            service.cancel(&owner, req.id, None).await,
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_expires_pending_approvals() {
        let store = MemoryStore::new()
            .with_approver(approver("Ana", Tier::Coordinator))
            .with_approver(approver("Bia", Tier::Coordinator));
        let service = service_with(store);
        let owner = requester();
        let req = service.create(&owner, payload(vec![item(1, 1_000)])).await.unwrap();
        let routed = service.route_for_approval(&buyer(), req.id).await.unwrap();
        assert_eq!(routed.approvals.len(), 2);

        service.cancel(&owner, req.id, None).await.unwrap();

        let approvals = service
            .store
            .list_approvals(&ApprovalFilter { requisition_id: Some(req.id), status: None })
            .await
            .unwrap();
        assert!(approvals.iter().all(|a| a.status == ApprovalStatus::Expired));
    }

    #[tokio::test]
    async fn conclude_quoting_requires_the_requisition_in_quoting() {
        let store = MemoryStore::new();
        let service = service_with(store);
        let req = service.create(&requester(), payload(vec![item(1, 1_000)])).await.unwrap();
        // Cotação criada "por fora" para uma requisição ainda pendente
        let quote = QuoteService::new_quote(req.id, Uuid::new_v4(), None, Utc::now());
        let quote = service.store.create_quote(&quote).await.unwrap();

        let bids = vec![bid_payload("A", 900), bid_payload("B", 950)];
        let result = service
            .conclude_quoting(&buyer(), quote.id, ConcludeQuotePayload { bids, observation: None })
            .await;
        assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
        assert!(service.quotes.get(quote.id).await.unwrap().status.is_open());
    }

    #[tokio::test]
    async fn quote_without_requisition_concludes_with_a_warning() {
        let service = service_with(MemoryStore::new());
        let missing = Uuid::new_v4();
        let quote = QuoteService::new_quote(missing, Uuid::new_v4(), None, Utc::now());
        let quote = service.store.create_quote(&quote).await.unwrap();

        let bids = vec![bid_payload("A", 900), bid_payload("B", 950)];
        let concluded = service
            .conclude_quoting(&buyer(), quote.id, ConcludeQuotePayload { bids, observation: None })
            .await
            .unwrap();

        assert!(matches!(
            concluded.warning,
            Some(AppError::OrphanedReference { entity: "Requisição", id }) if id == missing
        ));
        assert!(concluded.requisition.is_none());
        assert!(!concluded.reapproval);
        assert!(concluded.savings.is_none());
        assert_eq!(concluded.quote.status, QuoteStatus::Concluded);
        assert_eq!(concluded.quote.selected_value, Some(Decimal::from(900)));

        let stored = service.quotes.get(quote.id).await.unwrap();
        assert_eq!(stored.status, QuoteStatus::Concluded);
    }

    #[tokio::test]
    async fn item_total_overflow_is_rejected_on_create() {
        let service = service_with(MemoryStore::new());
        let huge = RequisitionItem {
            description: "Lote".into(),
            quantity: Decimal::MAX,
            unit: "un".into(),
            unit_value: Decimal::from(2),
        };
        let result = service.create(&requester(), payload(vec![huge])).await;
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
        assert!(service.list(&RequisitionFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_collision_leaves_the_requisition_pending() {
        let store = MemoryStore::new()
            .with_approver(approver("Ana", Tier::Coordinator))
            .with_approver(approver("Bia", Tier::Coordinator));
        let service = service_with(store);
        let req = service.create(&requester(), payload(vec![item(1, 1_000)])).await.unwrap();

        // Duas aprovações com o mesmo token: a gravação inteira é recusada
        let current = service.get(req.id).await.unwrap();
        let now = Utc::now();
        let approvers = service.store.list_approvers(Tier::Coordinator).await.unwrap();
        let mut transition =
            RequisitionService::transition(current, WorkflowEvent::RouteForApproval, |_| {}).unwrap();
        let mut approvals = service.new_approvals(req.id, Tier::Coordinator, &approvers, now);
        approvals[1].token = approvals[0].token.clone();
        transition.effects.new_approvals = approvals;

        let result = service.commit(&transition, WorkflowEvent::RouteForApproval).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        assert_eq!(service.get(req.id).await.unwrap().status, RequisitionStatus::Pending);
        let stored = service
            .store
            .list_approvals(&ApprovalFilter { requisition_id: Some(req.id), status: None })
            .await
            .unwrap();
        assert!(stored.is_empty());

        // A rota normal segue funcionando depois
        let routed = service.route_for_approval(&buyer(), req.id).await.unwrap();
        assert_eq!(routed.approvals.len(), 2);
    }

    #[tokio::test]
    async fn cancel_during_quoting_cancels_the_open_quote() {
        let store = MemoryStore::new()
            .with_approver(approver("Ana", Tier::Coordinator))
            .with_buyer(Buyer {
                id: Uuid::nil(),
                name: "Aline".into(),
                email: "aline@empresa.com".into(),
                active: true,
            });
        let service = service_with(store);
        let owner = requester();
        let req = service.create(&owner, payload(vec![item(1, 1_000)])).await.unwrap();
        service.route_for_approval(&buyer(), req.id).await.unwrap();
        let current = service.get(req.id).await.unwrap();
        service
            .decide(current, Decision::Approve, Utc::now(), None)
            .await
            .unwrap();
        let routed = service
            .route_for_quoting(
                &buyer(),
                req.id,
                RouteForQuotingPayload { buyer_id: Uuid::nil(), deadline: None },
            )
            .await
            .unwrap();
        assert_eq!(routed.quote.status, QuoteStatus::Pending);

        service.cancel(&owner, req.id, None).await.unwrap();

        let quotes = service
            .store
            .list_quotes(&QuoteFilter { requisition_id: Some(req.id), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].status, QuoteStatus::Cancelled);
    }
}
