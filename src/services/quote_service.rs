// src/services/quote_service.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::{ConcludedQuote, PurchasingStore, QuoteConclusionWrite, QuoteFilter, Transition},
    models::{
        auth::{RequestContext, Role},
        quote::{NewBidPayload, Quote, QuoteDetail, QuoteStatus, SupplierBid},
    },
};

/// Mínimo de propostas válidas para concluir uma cotação.
pub const MIN_VALID_BIDS: usize = 2;

/// Escolhe a proposta vencedora: menor valor total entre as válidas.
/// Empate fica com a primeira da lista (ordem de cadastro).
pub fn select_winner(bids: &[SupplierBid]) -> Result<&SupplierBid, AppError> {
    let valid: Vec<&SupplierBid> = bids.iter().filter(|b| b.is_valid()).collect();
    if valid.len() < MIN_VALID_BIDS {
        return Err(AppError::InsufficientBids { valid: valid.len() });
    }

    let mut winner = valid[0];
    for bid in &valid[1..] {
        // `<` estrito: em caso de empate a primeira proposta permanece
        if bid.total_value < winner.total_value {
            winner = bid;
        }
    }
    Ok(winner)
}

/// Economia em relação ao valor estimado (zero se a proposta vencedora for mais cara).
pub fn savings(estimated: Decimal, winner: Decimal) -> Decimal {
    (estimated - winner).max(Decimal::ZERO)
}

pub(crate) fn bid_from_payload(quote_id: Uuid, payload: NewBidPayload, now: DateTime<Utc>) -> SupplierBid {
    SupplierBid {
        id: Uuid::new_v4(),
        quote_id,
        supplier_name: payload.supplier_name.trim().to_string(),
        contact: payload.contact,
        total_value: payload.total_value,
        lead_time_days: payload.lead_time_days,
        payment_terms: payload.payment_terms,
        item_prices: payload.item_prices,
        selected: false,
        position: 0,
        created_at: now,
    }
}

/// Cotação pronta para ser gravada: vencedor já marcado, propostas inválidas descartadas.
#[derive(Debug, Clone)]
pub struct QuoteConclusion {
    expected: QuoteStatus,
    pub quote: Quote,
    pub bids: Vec<SupplierBid>,
}

impl QuoteConclusion {
    pub fn winner_value(&self) -> Decimal {
        self.quote.selected_value.unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct QuoteService {
    store: Arc<dyn PurchasingStore>,
}

impl QuoteService {
    pub fn new(store: Arc<dyn PurchasingStore>) -> Self {
        Self { store }
    }

    /// Cotação nova, ainda não gravada. Vai para o store junto com a transição
    /// da requisição para `em_cotacao`.
    pub(crate) fn new_quote(
        requisition_id: Uuid,
        buyer_id: Uuid,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Quote {
        Quote {
            id: Uuid::new_v4(),
            requisition_id,
            buyer_id: Some(buyer_id),
            status: QuoteStatus::Pending,
            selected_bid_id: None,
            selected_supplier: None,
            selected_value: None,
            observation: None,
            deadline,
            concluded_at: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            bids: Vec::new(),
        }
    }

    // --- Cadastro de proposta ---
    pub async fn register_bid(
        &self,
        ctx: &RequestContext,
        quote_id: Uuid,
        payload: NewBidPayload,
    ) -> Result<SupplierBid, AppError> {
        ctx.require_role(Role::Comprador)?;
        payload.validate()?;

        let quote = self.get(quote_id).await?;
        if !quote.status.is_open() {
            return Err(AppError::Conflict(format!(
                "cotação {quote_id} não aceita mais propostas"
            )));
        }

        let bid = bid_from_payload(quote_id, payload, Utc::now());
        let saved = self.store.add_bid(quote_id, quote.status, &bid).await?;

        tracing::info!(
            cotacao = %quote_id,
            fornecedor = %saved.supplier_name,
            valor = %saved.total_value,
            "Proposta registrada"
        );
        Ok(saved)
    }

    /// Monta a conclusão sem gravar: junta as propostas já cadastradas com as
    /// novas, descarta as inválidas e marca o vencedor.
    pub fn prepare_conclusion(
        quote: Quote,
        extra_bids: Vec<NewBidPayload>,
        observation: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QuoteConclusion, AppError> {
        if !quote.status.is_open() {
            return Err(AppError::Conflict(format!(
                "cotação {} já está {:?}",
                quote.id, quote.status
            )));
        }

        // 1. Todas as propostas, na ordem de cadastro
        let mut bids = quote.bids.clone();
        bids.extend(extra_bids.into_iter().map(|p| bid_from_payload(quote.id, p, now)));
        bids.retain(SupplierBid::is_valid);
        for (position, bid) in bids.iter_mut().enumerate() {
            bid.position = position as i32;
            bid.selected = false;
        }

        // 2. Vencedor
        let winner = select_winner(&bids)?;
        let (winner_id, winner_name, winner_value) =
            (winner.id, winner.supplier_name.clone(), winner.total_value);
        for bid in bids.iter_mut() {
            bid.selected = bid.id == winner_id;
        }

        // 3. Cotação concluída
        let expected = quote.status;
        let mut quote = quote;
        quote.status = QuoteStatus::Concluded;
        quote.selected_bid_id = Some(winner_id);
        quote.selected_supplier = Some(winner_name);
        quote.selected_value = Some(winner_value);
        if observation.is_some() {
            quote.observation = observation;
        }
        quote.concluded_at = Some(now);
        quote.updated_at = now;
        quote.bids = Vec::new();

        Ok(QuoteConclusion { expected, quote, bids })
    }

    /// Grava a conclusão e, se houver, a transição da requisição numa só operação.
    /// Falha com `Conflict` se outra chamada concluiu antes ou se entrou proposta
    /// depois da leitura usada em `prepare_conclusion`.
    pub async fn commit_conclusion(
        &self,
        conclusion: QuoteConclusion,
        transition: Option<Transition>,
    ) -> Result<ConcludedQuote, AppError> {
        let QuoteConclusion { expected, quote, bids } = conclusion;
        let write = QuoteConclusionWrite { expected, quote, bids, transition };
        let saved = self.store.conclude_quote(&write).await?;
        tracing::info!(
            cotacao = %saved.quote.id,
            vencedor = ?saved.quote.selected_supplier,
            valor = ?saved.quote.selected_value,
            propostas = saved.quote.bids.len(),
            "Cotação concluída"
        );
        Ok(saved)
    }

    // --- Leitura ---

    pub async fn get(&self, quote_id: Uuid) -> Result<Quote, AppError> {
        self.store
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| AppError::not_found("Cotação", quote_id))
    }

    pub async fn list(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, AppError> {
        self.store.list_quotes(filter).await
    }

    /// Cotação com a requisição e o comprador buscados à parte (podem faltar).
    pub async fn detail(&self, quote_id: Uuid) -> Result<QuoteDetail, AppError> {
        let quote = self.get(quote_id).await?;
        let requisition = self.store.get_requisition(quote.requisition_id).await?;
        if requisition.is_none() {
            tracing::warn!(cotacao = %quote.id, requisicao = %quote.requisition_id, "Cotação sem requisição");
        }
        let buyer_name = match quote.buyer_id {
            Some(id) => self.store.get_buyer(id).await?.map(|b| b.name),
            None => None,
        };
        Ok(QuoteDetail { quote, requisition, buyer_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::tier::Tier;

    fn bid(name: &str, total: i64, position: i32) -> SupplierBid {
        SupplierBid {
            id: Uuid::new_v4(),
            quote_id: Uuid::nil(),
            supplier_name: name.into(),
            contact: None,
            total_value: Decimal::from(total),
            lead_time_days: Some(10),
            payment_terms: None,
            item_prices: vec![],
            selected: false,
            position,
            created_at: Utc::now(),
        }
    }

    fn payload(name: &str, total: i64) -> NewBidPayload {
        NewBidPayload {
            supplier_name: name.into(),
            contact: None,
            total_value: Decimal::from(total),
            lead_time_days: None,
            payment_terms: None,
            item_prices: vec![],
        }
    }

    fn buyer_ctx() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), "Aline", Role::Comprador, Tier::Unassigned)
    }

    async fn open_quote(store: Arc<MemoryStore>) -> (QuoteService, Quote) {
        let quote = QuoteService::new_quote(Uuid::new_v4(), Uuid::new_v4(), None, Utc::now());
        let quote = store.create_quote(&quote).await.unwrap();
        (QuoteService::new(store), quote)
    }

    // Relê a cotação e conclui, sem transição de requisição
    async fn conclude(
        service: &QuoteService,
        quote_id: Uuid,
        extra_bids: Vec<NewBidPayload>,
        observation: Option<String>,
    ) -> Result<Quote, AppError> {
        let quote = service.get(quote_id).await?;
        let conclusion = QuoteService::prepare_conclusion(quote, extra_bids, observation, Utc::now())?;
        Ok(service.commit_conclusion(conclusion, None).await?.quote)
    }

    #[test]
    fn lowest_total_wins() {
        let bids = vec![bid("Eletro Minas", 28_500, 0), bid("Cabos Brasil", 35_000, 1), bid("Sul Energia", 31_200, 2)];
        let winner = select_winner(&bids).unwrap();
        assert_eq!(winner.supplier_name, "Eletro Minas");
        assert_eq!(winner.total_value, Decimal::from(28_500));
    }

    #[test]
    fn tie_keeps_the_first_listed_bid() {
        let bids = vec![bid("A", 35_000, 0), bid("B", 28_500, 1), bid("C", 28_500, 2)];
        assert_eq!(select_winner(&bids).unwrap().supplier_name, "B");
        // Mesma entrada, mesmo resultado
        assert_eq!(select_winner(&bids).unwrap().id, bids[1].id);
    }

    #[test]
    fn invalid_bids_do_not_count() {
        let bids = vec![bid("A", 1_000, 0), bid("   ", 10, 1), bid("C", 0, 2)];
        assert!(matches!(
            select_winner(&bids),
            Err(AppError::InsufficientBids { valid: 1 })
        ));
        assert!(matches!(select_winner(&[]), Err(AppError::InsufficientBids { valid: 0 })));
    }

    #[test]
    fn savings_never_goes_negative() {
        assert_eq!(savings(Decimal::from(35_000), Decimal::from(28_500)), Decimal::from(6_500));
        assert_eq!(savings(Decimal::from(20_000), Decimal::from(28_500)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn conclusion_marks_exactly_one_winner() {
        let (service, quote) = open_quote(Arc::new(MemoryStore::new())).await;
        let ctx = buyer_ctx();
        service.register_bid(&ctx, quote.id, payload("Eletro Minas", 28_500)).await.unwrap();
        service.register_bid(&ctx, quote.id, payload("Cabos Brasil", 35_000)).await.unwrap();

        let concluded = conclude(
            &service,
            quote.id,
            vec![payload("Sul Energia", 31_200)],
            Some("Menor preço".into()),
        )
        .await
        .unwrap();

        assert_eq!(concluded.status, QuoteStatus::Concluded);
        assert_eq!(concluded.selected_value, Some(Decimal::from(28_500)));
        assert_eq!(concluded.selected_supplier.as_deref(), Some("Eletro Minas"));
        assert_eq!(concluded.bids.len(), 3);
        let selected: Vec<_> = concluded.bids.iter().filter(|b| b.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(Some(selected[0].id), concluded.selected_bid_id);
    }

    #[tokio::test]
    async fn conclusion_with_one_valid_bid_changes_nothing() {
        let (service, quote) = open_quote(Arc::new(MemoryStore::new())).await;
        service.register_bid(&buyer_ctx(), quote.id, payload("Único", 9_000)).await.unwrap();

        let result = conclude(&service, quote.id, vec![payload("", 100)], None).await;
        assert!(matches!(result, Err(AppError::InsufficientBids { valid: 1 })));

        let reread = service.get(quote.id).await.unwrap();
        assert_eq!(reread.status, QuoteStatus::InProgress);
        assert!(reread.selected_bid_id.is_none());
        assert!(reread.bids.iter().all(|b| !b.selected));
    }

    #[tokio::test]
    async fn second_conclusion_is_rejected() {
        let (service, quote) = open_quote(Arc::new(MemoryStore::new())).await;
        let bids = vec![payload("A", 100), payload("B", 200)];
        conclude(&service, quote.id, bids.clone(), None).await.unwrap();

        let again = conclude(&service, quote.id, bids, None).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn bid_registered_after_reading_blocks_the_stale_conclusion() {
        let (service, quote) = open_quote(Arc::new(MemoryStore::new())).await;
        let ctx = buyer_ctx();
        service.register_bid(&ctx, quote.id, payload("Eletro Minas", 28_500)).await.unwrap();
        service.register_bid(&ctx, quote.id, payload("Cabos Brasil", 35_000)).await.unwrap();

        // Conclusão montada sobre duas propostas...
        let read = service.get(quote.id).await.unwrap();
        let stale = QuoteService::prepare_conclusion(read, vec![], None, Utc::now()).unwrap();

        // ...e uma terceira entra antes da gravação
        service.register_bid(&ctx, quote.id, payload("Barato", 10_000)).await.unwrap();

        let result = service.commit_conclusion(stale, None).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        // Nada foi apagado: a proposta nova continua lá e a cotação segue aberta
        let reread = service.get(quote.id).await.unwrap();
        assert_eq!(reread.status, QuoteStatus::InProgress);
        assert_eq!(reread.bids.len(), 3);
        assert!(reread.bids.iter().any(|b| b.supplier_name == "Barato"));

        // Relendo, a conclusão enxerga a proposta nova e ela vence
        let concluded = conclude(&service, quote.id, vec![], None).await.unwrap();
        assert_eq!(concluded.bids.len(), 3);
        assert_eq!(concluded.selected_supplier.as_deref(), Some("Barato"));
        assert_eq!(concluded.selected_value, Some(Decimal::from(10_000)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_conclusions_pick_a_single_winner() {
        let (service, quote) = open_quote(Arc::new(MemoryStore::new())).await;
        let ctx = buyer_ctx();
        service.register_bid(&ctx, quote.id, payload("A", 1_000)).await.unwrap();
        service.register_bid(&ctx, quote.id, payload("B", 2_000)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let service = service.clone();
            let quote_id = quote.id;
            handles.push(tokio::spawn(async move {
                conclude(&service, quote_id, vec![payload(&format!("Extra {i}"), 500 + i)], None).await
            }));
        }

        let mut concluded = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(quote) => concluded.push(quote),
                Err(AppError::Conflict(_)) => {}
                Err(other) => panic!("erro inesperado: {other:?}"),
            }
        }
        assert_eq!(concluded.len(), 1);

        let stored = service.get(quote.id).await.unwrap();
        assert_eq!(stored.status, QuoteStatus::Concluded);
        assert_eq!(stored.selected_bid_id, concluded[0].selected_bid_id);
        assert_eq!(stored.bids.iter().filter(|b| b.selected).count(), 1);
    }

    #[tokio::test]
    async fn requester_cannot_register_bids() {
        let (service, quote) = open_quote(Arc::new(MemoryStore::new())).await;
        let ctx = RequestContext::new(Uuid::new_v4(), "Rui", Role::Requisitante, Tier::Unassigned);
        let result = service.register_bid(&ctx, quote.id, payload("A", 100)).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }
}
