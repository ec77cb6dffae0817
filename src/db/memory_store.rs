// src/db/memory_store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::{
        format_requisition_number, sequence_period, ApprovalFilter, ApprovalUpdate,
        ConcludedQuote, PurchasingStore, QuoteConclusionWrite, QuoteFilter, RequisitionFilter,
        RequisitionNumbering, Transition, TransitionResult,
    },
    models::{
        approval::{Approval, ApprovalStatus, Approver},
        quote::{Buyer, Quote, QuoteStatus, SupplierBid},
        requisition::Requisition,
        tier::Tier,
    },
};

#[derive(Default)]
struct MemoryState {
    requisitions: HashMap<Uuid, Requisition>,
    quotes: HashMap<Uuid, Quote>,
    approvals: HashMap<Uuid, Approval>,
    approvers: Vec<Approver>,
    buyers: HashMap<Uuid, Buyer>,
    sequences: HashMap<String, u32>,
}

/// Store em memória. Um único Mutex serializa todas as operações, então
/// cada atualização condicional é atômica em relação às demais.
/// Usado nos testes e no modo de desenvolvimento sem `DATABASE_URL`.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approver(mut self, approver: Approver) -> Self {
        self.state.get_mut().approvers.push(approver);
        self
    }

    pub fn with_buyer(mut self, buyer: Buyer) -> Self {
        self.state.get_mut().buyers.insert(buyer.id, buyer);
        self
    }
}

fn conflict(entity: &str, id: Uuid, expected: impl std::fmt::Debug) -> AppError {
    AppError::Conflict(format!("{entity} {id} (estado esperado {expected:?})"))
}

fn apply_approval_update(approval: &mut Approval, update: &ApprovalUpdate) {
    approval.status = update.status;
    if update.observation.is_some() {
        approval.observation = update.observation.clone();
    }
    approval.decided_at = Some(update.decided_at);
}

impl MemoryState {
    // Tudo é conferido antes de qualquer mutação: uma falha não deixa escrita parcial
    fn check_transition(&self, transition: &Transition) -> Result<(), AppError> {
        let id = transition.requisition.id;
        let current = self
            .requisitions
            .get(&id)
            .ok_or_else(|| AppError::not_found("Requisição", id))?;
        if current.status != transition.expected {
            return Err(conflict("requisição", id, transition.expected));
        }

        let effects = &transition.effects;
        for (i, approval) in effects.new_approvals.iter().enumerate() {
            let duplicated = self.approvals.values().any(|a| a.token == approval.token)
                || effects.new_approvals[..i].iter().any(|a| a.token == approval.token);
            if duplicated {
                return Err(AppError::Conflict("token de aprovação duplicado".into()));
            }
        }
        if let Some(quote) = &effects.open_quote {
            if self.quotes.contains_key(&quote.id) {
                return Err(AppError::Conflict(format!("cotação {} já existe", quote.id)));
            }
        }
        Ok(())
    }

    fn apply_transition(&mut self, transition: &Transition) -> TransitionResult {
        let requisition = transition.requisition.clone();
        let id = requisition.id;
        self.requisitions.insert(id, requisition.clone());
        let effects = &transition.effects;

        // Expira e cancela antes de inserir: os registros novos não são afetados
        let mut expired_approvals = 0;
        if let Some(update) = &effects.expire_pending {
            for approval in self
                .approvals
                .values_mut()
                .filter(|a| a.requisition_id == id && a.status == ApprovalStatus::Pending)
            {
                apply_approval_update(approval, update);
                expired_approvals += 1;
            }
        }

        let mut cancelled_quote = None;
        if effects.cancel_open_quote {
            if let Some(quote) = self
                .quotes
                .values_mut()
                .find(|q| q.requisition_id == id && q.status.is_open())
            {
                quote.status = QuoteStatus::Cancelled;
                quote.updated_at = requisition.updated_at;
                cancelled_quote = Some(quote.clone());
            }
        }

        for approval in &effects.new_approvals {
            self.approvals.insert(approval.id, approval.clone());
        }
        if let Some(quote) = &effects.open_quote {
            self.quotes.insert(quote.id, quote.clone());
        }

        TransitionResult {
            requisition,
            approvals: effects.new_approvals.clone(),
            opened_quote: effects.open_quote.clone(),
            expired_approvals,
            cancelled_quote,
        }
    }
}

#[async_trait]
impl PurchasingStore for MemoryStore {
    async fn create_requisition(&self, requisition: &Requisition) -> Result<Requisition, AppError> {
        let mut state = self.state.lock().await;
        if state.requisitions.contains_key(&requisition.id) {
            return Err(AppError::Conflict(format!("requisição {} já existe", requisition.id)));
        }
        state.requisitions.insert(requisition.id, requisition.clone());
        Ok(requisition.clone())
    }

    async fn get_requisition(&self, id: Uuid) -> Result<Option<Requisition>, AppError> {
        Ok(self.state.lock().await.requisitions.get(&id).cloned())
    }

    async fn list_requisitions(&self, filter: &RequisitionFilter) -> Result<Vec<Requisition>, AppError> {
        let state = self.state.lock().await;
        let mut list: Vec<Requisition> = state
            .requisitions
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.number.cmp(&a.number)));
        if let Some(limit) = filter.limit {
            list.truncate(limit);
        }
        Ok(list)
    }

    async fn transition_requisition(&self, transition: &Transition) -> Result<TransitionResult, AppError> {
        let mut state = self.state.lock().await;
        state.check_transition(transition)?;
        Ok(state.apply_transition(transition))
    }

    async fn create_quote(&self, quote: &Quote) -> Result<Quote, AppError> {
        let mut state = self.state.lock().await;
        state.quotes.insert(quote.id, quote.clone());
        Ok(quote.clone())
    }

    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, AppError> {
        Ok(self.state.lock().await.quotes.get(&id).cloned())
    }

    async fn list_quotes(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, AppError> {
        let state = self.state.lock().await;
        let mut list: Vec<Quote> = state
            .quotes
            .values()
            .filter(|q| filter.matches(q))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn add_bid(
        &self,
        quote_id: Uuid,
        expected: QuoteStatus,
        bid: &SupplierBid,
    ) -> Result<SupplierBid, AppError> {
        let mut state = self.state.lock().await;
        let quote = state
            .quotes
            .get_mut(&quote_id)
            .ok_or_else(|| AppError::not_found("Cotação", quote_id))?;
        if quote.status != expected {
            return Err(conflict("cotação", quote_id, expected));
        }
        let mut bid = bid.clone();
        bid.quote_id = quote_id;
        bid.position = quote.bids.len() as i32;
        quote.bids.push(bid.clone());
        quote.status = QuoteStatus::InProgress;
        quote.revision += 1;
        quote.updated_at = bid.created_at;
        Ok(bid)
    }

    async fn conclude_quote(&self, write: &QuoteConclusionWrite) -> Result<ConcludedQuote, AppError> {
        let mut state = self.state.lock().await;
        let id = write.quote.id;
        let current = state
            .quotes
            .get(&id)
            .ok_or_else(|| AppError::not_found("Cotação", id))?;
        if current.status != write.expected || current.revision != write.quote.revision {
            return Err(AppError::Conflict(format!(
                "cotação {id} mudou desde a leitura (revisão {}, atual {})",
                write.quote.revision, current.revision
            )));
        }
        if let Some(transition) = &write.transition {
            state.check_transition(transition)?;
        }

        let mut concluded = write.quote.clone();
        concluded.revision += 1;
        concluded.bids = write.bids.clone();
        state.quotes.insert(id, concluded.clone());

        let transition = write.transition.as_ref().map(|t| state.apply_transition(t));
        Ok(ConcludedQuote { quote: concluded, transition })
    }

    async fn create_approval(&self, approval: &Approval) -> Result<Approval, AppError> {
        let mut state = self.state.lock().await;
        if state.approvals.values().any(|a| a.token == approval.token) {
            return Err(AppError::Conflict("token de aprovação duplicado".into()));
        }
        state.approvals.insert(approval.id, approval.clone());
        Ok(approval.clone())
    }

    async fn get_approval_by_token(&self, token: &str) -> Result<Option<Approval>, AppError> {
        let state = self.state.lock().await;
        Ok(state.approvals.values().find(|a| a.token == token).cloned())
    }

    async fn list_approvals(&self, filter: &ApprovalFilter) -> Result<Vec<Approval>, AppError> {
        let state = self.state.lock().await;
        let mut list: Vec<Approval> = state
            .approvals
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn update_approval_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        update: &ApprovalUpdate,
    ) -> Result<Approval, AppError> {
        let mut state = self.state.lock().await;
        let approval = state
            .approvals
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Aprovação", id))?;
        if approval.status != expected {
            return Err(conflict("aprovação", id, expected));
        }
        apply_approval_update(approval, update);
        Ok(approval.clone())
    }

    async fn list_approvers(&self, tier: Tier) -> Result<Vec<Approver>, AppError> {
        let state = self.state.lock().await;
        let mut list: Vec<Approver> = state
            .approvers
            .iter()
            .filter(|a| a.active && a.tier == tier)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn get_buyer(&self, id: Uuid) -> Result<Option<Buyer>, AppError> {
        Ok(self.state.lock().await.buyers.get(&id).cloned())
    }
}

#[async_trait]
impl RequisitionNumbering for MemoryStore {
    async fn next_number(&self, at: DateTime<Utc>) -> Result<String, AppError> {
        let mut state = self.state.lock().await;
        let counter = state.sequences.entry(sequence_period(at)).or_insert(0);
        *counter += 1;
        Ok(format_requisition_number(at, *counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use crate::{db::store::TransitionEffects, models::requisition::RequisitionStatus};

    fn requisition(status: RequisitionStatus) -> Requisition {
        let now = Utc::now();
        Requisition {
            id: Uuid::new_v4(),
            number: "RC-202602-0001".into(),
            requester_id: None,
            requester_name: "Carlos".into(),
            work_site_id: None,
            work_site_name: "SE Frutal".into(),
            description: "Cabos".into(),
            justification: None,
            urgency: Default::default(),
            category: None,
            estimated_value: Decimal::from(1_000),
            status,
            approval_tier: Tier::Coordinator,
            buyer_id: None,
            original_text: None,
            needed_by: None,
            approval_requested_at: None,
            approval_resolved_at: None,
            created_at: now,
            updated_at: now,
            items: vec![],
        }
    }

    fn approval(requisition_id: Uuid, token: &str) -> Approval {
        Approval {
            id: Uuid::new_v4(),
            requisition_id,
            approver_id: None,
            approver_name: "Ana".into(),
            approver_email: "ana@empresa.com".into(),
            level: Tier::Coordinator,
            status: ApprovalStatus::Pending,
            token: token.into(),
            observation: None,
            deadline: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }

    fn quote(requisition_id: Uuid) -> Quote {
        let now = Utc::now();
        Quote {
            id: Uuid::new_v4(),
            requisition_id,
            buyer_id: None,
            status: QuoteStatus::Pending,
            selected_bid_id: None,
            selected_supplier: None,
            selected_value: None,
            observation: None,
            deadline: None,
            concluded_at: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            bids: vec![],
        }
    }

    fn bid(name: &str, total: i64) -> SupplierBid {
        SupplierBid {
            id: Uuid::new_v4(),
            quote_id: Uuid::nil(),
            supplier_name: name.into(),
            contact: None,
            total_value: Decimal::from(total),
            lead_time_days: None,
            payment_terms: None,
            item_prices: vec![],
            selected: false,
            position: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_transition_writes_nothing() {
        let store = MemoryStore::new();
        let pending = store.create_requisition(&requisition(RequisitionStatus::Pending)).await.unwrap();
        store.create_approval(&approval(Uuid::new_v4(), "repetido")).await.unwrap();

        let mut routed = pending.clone();
        routed.status = RequisitionStatus::AwaitingApproval;
        let mut transition = Transition::new(RequisitionStatus::Pending, routed);
        transition.effects = TransitionEffects {
            new_approvals: vec![approval(pending.id, "novo"), approval(pending.id, "repetido")],
            ..Default::default()
        };

        let result = store.transition_requisition(&transition).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let reread = store.get_requisition(pending.id).await.unwrap().unwrap();
        assert_eq!(reread.status, RequisitionStatus::Pending);
        assert!(store.get_approval_by_token("novo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_applies_all_effects_together() {
        let store = MemoryStore::new();
        let current = store.create_requisition(&requisition(RequisitionStatus::Quoting)).await.unwrap();
        store.create_approval(&approval(current.id, "antigo")).await.unwrap();
        let open = store.create_quote(&quote(current.id)).await.unwrap();

        let mut cancelled = current.clone();
        cancelled.status = RequisitionStatus::Cancelled;
        let mut transition = Transition::new(RequisitionStatus::Quoting, cancelled);
        transition.effects.cancel_open_quote = true;
        transition.effects.expire_pending = Some(ApprovalUpdate {
            status: ApprovalStatus::Expired,
            observation: Some("Requisição cancelada".into()),
            decided_at: Utc::now(),
        });

        let result = store.transition_requisition(&transition).await.unwrap();
        assert_eq!(result.requisition.status, RequisitionStatus::Cancelled);
        assert_eq!(result.expired_approvals, 1);
        assert_eq!(result.cancelled_quote.map(|q| q.id), Some(open.id));
        let old = store.get_approval_by_token("antigo").await.unwrap().unwrap();
        assert_eq!(old.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn conclusion_over_a_stale_revision_is_a_conflict() {
        let store = MemoryStore::new();
        let open = store.create_quote(&quote(Uuid::new_v4())).await.unwrap();
        store.add_bid(open.id, QuoteStatus::Pending, &bid("A", 300)).await.unwrap();
        store.add_bid(open.id, QuoteStatus::InProgress, &bid("B", 200)).await.unwrap();

        let snapshot = store.get_quote(open.id).await.unwrap().unwrap();
        assert_eq!(snapshot.revision, 2);
        store.add_bid(open.id, QuoteStatus::InProgress, &bid("C", 100)).await.unwrap();

        let mut concluded = snapshot.clone();
        concluded.status = QuoteStatus::Concluded;
        let write = QuoteConclusionWrite {
            expected: QuoteStatus::InProgress,
            bids: snapshot.bids.clone(),
            quote: concluded,
            transition: None,
        };
        assert!(matches!(store.conclude_quote(&write).await, Err(AppError::Conflict(_))));

        let reread = store.get_quote(open.id).await.unwrap().unwrap();
        assert_eq!(reread.status, QuoteStatus::InProgress);
        assert_eq!(reread.bids.len(), 3);
    }

    #[tokio::test]
    async fn numbering_restarts_every_month() {
        let store = MemoryStore::new();
        let feb = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();

        assert_eq!(store.next_number(feb).await.unwrap(), "RC-202602-0001");
        assert_eq!(store.next_number(feb).await.unwrap(), "RC-202602-0002");
        assert_eq!(store.next_number(mar).await.unwrap(), "RC-202603-0001");
        assert_eq!(store.next_number(feb).await.unwrap(), "RC-202602-0003");
    }

    #[tokio::test]
    async fn approvers_are_listed_by_exact_tier() {
        let approver = |name: &str, tier: Tier, active: bool| Approver {
            id: Uuid::new_v4(),
            name: name.into(),
            email: format!("{}@empresa.com", name.to_lowercase()),
            tier,
            active,
        };
        let store = MemoryStore::new()
            .with_approver(approver("Bruno", Tier::Manager, true))
            .with_approver(approver("Ana", Tier::Manager, true))
            .with_approver(approver("Caio", Tier::Manager, false))
            .with_approver(approver("Dora", Tier::Director, true));

        let managers = store.list_approvers(Tier::Manager).await.unwrap();
        let names: Vec<_> = managers.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Bruno"]);
        assert!(store.list_approvers(Tier::Executive).await.unwrap().is_empty());
    }
}
