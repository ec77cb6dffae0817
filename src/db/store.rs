// src/db/store.rs

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{
        approval::{Approval, ApprovalStatus, Approver},
        quote::{Buyer, Quote, QuoteStatus, SupplierBid},
        requisition::{Requisition, RequisitionStatus},
        tier::Tier,
    },
};

// --- Filtros de listagem ---

#[derive(Debug, Clone, Default)]
pub struct RequisitionFilter {
    pub status: Option<RequisitionStatus>,
    pub work_site_id: Option<String>,
    pub buyer_id: Option<Uuid>,
    // Busca por trecho da descrição ou do número (sem diferenciar maiúsculas)
    pub search: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl RequisitionFilter {
    pub fn matches(&self, requisition: &Requisition) -> bool {
        if self.status.is_some_and(|s| s != requisition.status) {
            return false;
        }
        if let Some(site) = &self.work_site_id {
            if requisition.work_site_id.as_deref() != Some(site.as_str()) {
                return false;
            }
        }
        if self.buyer_id.is_some() && self.buyer_id != requisition.buyer_id {
            return false;
        }
        if let Some(after) = self.created_after {
            if requisition.created_at < after {
                return false;
            }
        }
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            if !requisition.description.to_lowercase().contains(&term)
                && !requisition.number.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuoteFilter {
    pub requisition_id: Option<Uuid>,
    pub buyer_id: Option<Uuid>,
    pub status: Option<QuoteStatus>,
}

impl QuoteFilter {
    pub fn matches(&self, quote: &Quote) -> bool {
        self.requisition_id.is_none_or(|id| id == quote.requisition_id)
            && (self.buyer_id.is_none() || self.buyer_id == quote.buyer_id)
            && self.status.is_none_or(|s| s == quote.status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    pub requisition_id: Option<Uuid>,
    pub status: Option<ApprovalStatus>,
}

impl ApprovalFilter {
    pub fn matches(&self, approval: &Approval) -> bool {
        self.requisition_id.is_none_or(|id| id == approval.requisition_id)
            && self.status.is_none_or(|s| s == approval.status)
    }
}

/// Mudança de estado de uma aprovação (decisão ou expiração).
#[derive(Debug, Clone)]
pub struct ApprovalUpdate {
    pub status: ApprovalStatus,
    pub observation: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Escritas que acompanham uma transição da requisição.
/// São gravadas na mesma transação: ou valem todas, ou nenhuma.
#[derive(Debug, Clone, Default)]
pub struct TransitionEffects {
    /// Aprovações novas, cada uma com seu token.
    pub new_approvals: Vec<Approval>,
    pub open_quote: Option<Quote>,
    /// Expira as aprovações ainda pendentes da requisição.
    pub expire_pending: Option<ApprovalUpdate>,
    /// Cancela a cotação em aberto da requisição, se houver.
    pub cancel_open_quote: bool,
}

/// Transição da requisição condicionada ao status anterior (`expected`).
/// `requisition` já traz o novo status e os campos alterados.
#[derive(Debug, Clone)]
pub struct Transition {
    pub expected: RequisitionStatus,
    pub requisition: Requisition,
    pub effects: TransitionEffects,
}

impl Transition {
    pub fn new(expected: RequisitionStatus, requisition: Requisition) -> Self {
        Self { expected, requisition, effects: TransitionEffects::default() }
    }
}

/// O que foi gravado por uma transição.
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub requisition: Requisition,
    pub approvals: Vec<Approval>,
    pub opened_quote: Option<Quote>,
    pub expired_approvals: usize,
    pub cancelled_quote: Option<Quote>,
}

/// Conclusão da cotação a gravar. A cotação carrega a `revision` lida:
/// se uma proposta entrou depois da leitura, a gravação falha com `Conflict`.
#[derive(Debug, Clone)]
pub struct QuoteConclusionWrite {
    pub expected: QuoteStatus,
    pub quote: Quote,
    /// Propostas finais, com o vencedor marcado.
    pub bids: Vec<SupplierBid>,
    /// Transição da requisição gravada junto (ausente quando a requisição não existe).
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone)]
pub struct ConcludedQuote {
    pub quote: Quote,
    pub transition: Option<TransitionResult>,
}

/// Interface de persistência consumida por todos os serviços.
///
/// As atualizações são condicionais: recebem o estado esperado e falham com
/// `AppError::Conflict` se outro chamador mudou o registro antes. É isso que
/// garante o consumo único dos tokens e a escolha única do vencedor.
#[async_trait]
pub trait PurchasingStore: Send + Sync {
    // =========================================================================
    //  REQUISIÇÕES
    // =========================================================================

    async fn create_requisition(&self, requisition: &Requisition) -> Result<Requisition, AppError>;

    async fn get_requisition(&self, id: Uuid) -> Result<Option<Requisition>, AppError>;

    /// Mais recentes primeiro.
    async fn list_requisitions(&self, filter: &RequisitionFilter) -> Result<Vec<Requisition>, AppError>;

    /// Grava a requisição (inclusive itens) e os efeitos da transição numa só
    /// operação atômica, se o status atual ainda for `transition.expected`.
    async fn transition_requisition(&self, transition: &Transition) -> Result<TransitionResult, AppError>;

    // =========================================================================
    //  COTAÇÕES
    // =========================================================================

    async fn create_quote(&self, quote: &Quote) -> Result<Quote, AppError>;

    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, AppError>;

    async fn list_quotes(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, AppError>;

    /// Adiciona uma proposta, move a cotação de `expected` para `em_andamento`
    /// e incrementa a revisão. A posição (ordem de cadastro) é atribuída pelo store.
    async fn add_bid(
        &self,
        quote_id: Uuid,
        expected: QuoteStatus,
        bid: &SupplierBid,
    ) -> Result<SupplierBid, AppError>;

    /// Operação atômica de conclusão: confere status e revisão, substitui as
    /// propostas pelas finais, grava a cotação e aplica a transição da requisição.
    async fn conclude_quote(&self, write: &QuoteConclusionWrite) -> Result<ConcludedQuote, AppError>;

    // =========================================================================
    //  APROVAÇÕES
    // =========================================================================

    async fn create_approval(&self, approval: &Approval) -> Result<Approval, AppError>;

    async fn get_approval_by_token(&self, token: &str) -> Result<Option<Approval>, AppError>;

    async fn list_approvals(&self, filter: &ApprovalFilter) -> Result<Vec<Approval>, AppError>;

    /// Compare-and-swap do status da aprovação.
    async fn update_approval_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        update: &ApprovalUpdate,
    ) -> Result<Approval, AppError>;

    // =========================================================================
    //  CADASTROS (aprovadores e compradores)
    // =========================================================================

    async fn list_approvers(&self, tier: Tier) -> Result<Vec<Approver>, AppError>;

    async fn get_buyer(&self, id: Uuid) -> Result<Option<Buyer>, AppError>;
}

/// Gerador externo da numeração `RC-YYYYMM-NNNN` (sequencial por mês).
#[async_trait]
pub trait RequisitionNumbering: Send + Sync {
    async fn next_number(&self, at: DateTime<Utc>) -> Result<String, AppError>;
}

pub fn format_requisition_number(at: DateTime<Utc>, sequence: u32) -> String {
    format!("RC-{:04}{:02}-{:04}", at.year(), at.month(), sequence)
}

/// Chave do período usado pela sequência mensal (ex.: "202602").
pub fn sequence_period(at: DateTime<Utc>) -> String {
    format!("{:04}{:02}", at.year(), at.month())
}
