// src/db/postgres_store.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, Executor, FromRow, PgPool, Postgres, Transaction};
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
        requisition::{Requisition, RequisitionItem},
        tier::Tier,
    },
};

// Listas de colunas compartilhadas pelos SELECT e RETURNING
macro_rules! requisition_columns {
    () => {
        "id, number, requester_id, requester_name, work_site_id, work_site_name, \
         description, justification, urgency, category, estimated_value, status, \
         approval_tier, buyer_id, original_text, needed_by, \
         approval_requested_at, approval_resolved_at, created_at, updated_at"
    };
}

macro_rules! quote_columns {
    () => {
        "id, requisition_id, buyer_id, status, selected_bid_id, selected_supplier, \
         selected_value, observation, deadline, concluded_at, revision, created_at, updated_at"
    };
}

macro_rules! bid_columns {
    () => {
        "id, quote_id, supplier_name, contact, total_value, lead_time_days, \
         payment_terms, item_prices, selected, position, created_at"
    };
}

macro_rules! approval_columns {
    () => {
        "id, requisition_id, approver_id, approver_name, approver_email, level, \
         status, token, observation, deadline, decided_at, created_at"
    };
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Linha de item com a chave da requisição, para carregar vários de uma vez
#[derive(FromRow)]
struct ItemRow {
    requisition_id: Uuid,
    description: String,
    quantity: rust_decimal::Decimal,
    unit: String,
    unit_value: rust_decimal::Decimal,
}

// ---
// Helpers (rodam na pool ou dentro de uma transação)
// ---

async fn load_items<'e, E>(executor: E, requisitions: &mut [Requisition]) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    if requisitions.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = requisitions.iter().map(|r| r.id).collect();
    let rows = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT requisition_id, description, quantity, unit, unit_value
        FROM requisition_items
        WHERE requisition_id = ANY($1)
        ORDER BY requisition_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(executor)
    .await?;

    for row in rows {
        if let Some(req) = requisitions.iter_mut().find(|r| r.id == row.requisition_id) {
            req.items.push(RequisitionItem {
                description: row.description,
                quantity: row.quantity,
                unit: row.unit,
                unit_value: row.unit_value,
            });
        }
    }
    Ok(())
}

async fn load_bids<'e, E>(executor: E, quotes: &mut [Quote]) -> Result<(), AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    if quotes.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = quotes.iter().map(|q| q.id).collect();
    let bids = sqlx::query_as::<_, SupplierBid>(concat!(
        "SELECT ",
        bid_columns!(),
        " FROM supplier_bids WHERE quote_id = ANY($1) ORDER BY quote_id, position"
    ))
    .bind(&ids)
    .fetch_all(executor)
    .await?;

    for bid in bids {
        if let Some(quote) = quotes.iter_mut().find(|q| q.id == bid.quote_id) {
            quote.bids.push(bid);
        }
    }
    Ok(())
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    requisition_id: Uuid,
    items: &[RequisitionItem],
) -> Result<(), AppError> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO requisition_items (requisition_id, position, description, quantity, unit, unit_value)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(requisition_id)
        .bind(position as i32)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.unit_value)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn insert_bid(
    tx: &mut Transaction<'_, Postgres>,
    bid: &SupplierBid,
) -> Result<SupplierBid, AppError> {
    let saved = sqlx::query_as::<_, SupplierBid>(concat!(
        r#"
        INSERT INTO supplier_bids
            (id, quote_id, supplier_name, contact, total_value, lead_time_days,
             payment_terms, item_prices, selected, position, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING "#,
        bid_columns!()
    ))
    .bind(bid.id)
    .bind(bid.quote_id)
    .bind(&bid.supplier_name)
    .bind(&bid.contact)
    .bind(bid.total_value)
    .bind(bid.lead_time_days)
    .bind(&bid.payment_terms)
    .bind(Json(&bid.item_prices))
    .bind(bid.selected)
    .bind(bid.position)
    .bind(bid.created_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(saved)
}

async fn insert_quote<'e, E>(executor: E, quote: &Quote) -> Result<Quote, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let saved = sqlx::query_as::<_, Quote>(concat!(
        r#"
        INSERT INTO quotes
            (id, requisition_id, buyer_id, status, observation, deadline, revision, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING "#,
        quote_columns!()
    ))
    .bind(quote.id)
    .bind(quote.requisition_id)
    .bind(quote.buyer_id)
    .bind(quote.status)
    .bind(&quote.observation)
    .bind(quote.deadline)
    .bind(quote.revision)
    .bind(quote.created_at)
    .bind(quote.updated_at)
    .fetch_one(executor)
    .await?;
    Ok(saved)
}

async fn insert_approval<'e, E>(executor: E, approval: &Approval) -> Result<Approval, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Approval>(concat!(
        r#"
        INSERT INTO approvals
            (id, requisition_id, approver_id, approver_name, approver_email, level,
             status, token, observation, deadline, decided_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING "#,
        approval_columns!()
    ))
    .bind(approval.id)
    .bind(approval.requisition_id)
    .bind(approval.approver_id)
    .bind(&approval.approver_name)
    .bind(&approval.approver_email)
    .bind(approval.level)
    .bind(approval.status)
    .bind(&approval.token)
    .bind(&approval.observation)
    .bind(approval.deadline)
    .bind(approval.decided_at)
    .bind(approval.created_at)
    .fetch_one(executor)
    .await
    .map_err(|e| map_unique_violation(e, "token de aprovação"))
}

/// Aplica a transição dentro de `tx`. `None` quando o status atual não é o esperado
/// (ou a requisição não existe); quem chama desfaz a transação.
async fn apply_transition(
    tx: &mut Transaction<'_, Postgres>,
    transition: &Transition,
) -> Result<Option<TransitionResult>, AppError> {
    let r = &transition.requisition;

    // 1. Atualização condicional no status anterior
    let updated = sqlx::query_as::<_, Requisition>(concat!(
        r#"
        UPDATE requisitions SET
            requester_name = $3, work_site_id = $4, work_site_name = $5,
            description = $6, justification = $7, urgency = $8, category = $9,
            estimated_value = $10, status = $11, approval_tier = $12, buyer_id = $13,
            needed_by = $14, approval_requested_at = $15, approval_resolved_at = $16,
            updated_at = $17
        WHERE id = $1 AND status = $2
        RETURNING "#,
        requisition_columns!()
    ))
    .bind(r.id)
    .bind(transition.expected)
    .bind(&r.requester_name)
    .bind(&r.work_site_id)
    .bind(&r.work_site_name)
    .bind(&r.description)
    .bind(&r.justification)
    .bind(r.urgency)
    .bind(&r.category)
    .bind(r.estimated_value)
    .bind(r.status)
    .bind(r.approval_tier)
    .bind(r.buyer_id)
    .bind(r.needed_by)
    .bind(r.approval_requested_at)
    .bind(r.approval_resolved_at)
    .bind(r.updated_at)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(mut requisition) = updated else {
        return Ok(None);
    };

    // 2. Itens: substitui o conjunto inteiro
    sqlx::query("DELETE FROM requisition_items WHERE requisition_id = $1")
        .bind(r.id)
        .execute(&mut **tx)
        .await?;
    insert_items(tx, r.id, &r.items).await?;
    requisition.items = r.items.clone();

    let effects = &transition.effects;

    // 3. Expira e cancela antes de inserir, para não atingir os registros novos
    let mut expired_approvals = 0;
    if let Some(update) = &effects.expire_pending {
        let done = sqlx::query(
            r#"
            UPDATE approvals SET
                status = $2,
                observation = COALESCE($3, observation),
                decided_at = $4
            WHERE requisition_id = $1 AND status = 'pendente'
            "#,
        )
        .bind(r.id)
        .bind(update.status)
        .bind(&update.observation)
        .bind(update.decided_at)
        .execute(&mut **tx)
        .await?;
        expired_approvals = done.rows_affected() as usize;
    }

    let mut cancelled_quote = None;
    if effects.cancel_open_quote {
        let mut cancelled = sqlx::query_as::<_, Quote>(concat!(
            r#"
            UPDATE quotes SET status = 'cancelada', updated_at = $2
            WHERE requisition_id = $1 AND status IN ('pendente', 'em_andamento')
            RETURNING "#,
            quote_columns!()
        ))
        .bind(r.id)
        .bind(r.updated_at)
        .fetch_all(&mut **tx)
        .await?;
        load_bids(&mut **tx, &mut cancelled).await?;
        cancelled_quote = cancelled.into_iter().next();
    }

    // 4. Registros novos
    let mut approvals = Vec::with_capacity(effects.new_approvals.len());
    for approval in &effects.new_approvals {
        approvals.push(insert_approval(&mut **tx, approval).await?);
    }
    let opened_quote = match &effects.open_quote {
        Some(quote) => Some(insert_quote(&mut **tx, quote).await?),
        None => None,
    };

    Ok(Some(TransitionResult {
        requisition,
        approvals,
        opened_quote,
        expired_approvals,
        cancelled_quote,
    }))
}

/// O UPDATE condicional não encontrou a linha: ou ela não existe, ou o estado mudou.
async fn cas_failure(
    pool: &PgPool,
    table: &'static str,
    entity: &'static str,
    id: Uuid,
) -> AppError {
    let query = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
    match sqlx::query_scalar::<_, bool>(&query).bind(id).fetch_one(pool).await {
        Ok(true) => AppError::Conflict(format!("{entity} {id} foi alterado(a) por outra operação")),
        Ok(false) => AppError::not_found(entity, id),
        Err(e) => e.into(),
    }
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return AppError::Conflict(format!("{what} duplicado(a)"));
        }
    }
    e.into()
}

#[async_trait]
impl PurchasingStore for PgStore {
    // =========================================================================
    //  REQUISIÇÕES
    // =========================================================================

    async fn create_requisition(&self, requisition: &Requisition) -> Result<Requisition, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut saved = sqlx::query_as::<_, Requisition>(concat!(
            r#"
            INSERT INTO requisitions
                (id, number, requester_id, requester_name, work_site_id, work_site_name,
                 description, justification, urgency, category, estimated_value, status,
                 approval_tier, buyer_id, original_text, needed_by,
                 approval_requested_at, approval_resolved_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING "#,
            requisition_columns!()
        ))
        .bind(requisition.id)
        .bind(&requisition.number)
        .bind(requisition.requester_id)
        .bind(&requisition.requester_name)
        .bind(&requisition.work_site_id)
        .bind(&requisition.work_site_name)
        .bind(&requisition.description)
        .bind(&requisition.justification)
        .bind(requisition.urgency)
        .bind(&requisition.category)
        .bind(requisition.estimated_value)
        .bind(requisition.status)
        .bind(requisition.approval_tier)
        .bind(requisition.buyer_id)
        .bind(&requisition.original_text)
        .bind(requisition.needed_by)
        .bind(requisition.approval_requested_at)
        .bind(requisition.approval_resolved_at)
        .bind(requisition.created_at)
        .bind(requisition.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "número de requisição"))?;

        insert_items(&mut tx, saved.id, &requisition.items).await?;
        tx.commit().await?;

        saved.items = requisition.items.clone();
        Ok(saved)
    }

    async fn get_requisition(&self, id: Uuid) -> Result<Option<Requisition>, AppError> {
        let found = sqlx::query_as::<_, Requisition>(concat!(
            "SELECT ",
            requisition_columns!(),
            " FROM requisitions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match found {
            Some(requisition) => {
                let mut list = [requisition];
                load_items(&self.pool, &mut list).await?;
                let [requisition] = list;
                Ok(Some(requisition))
            }
            None => Ok(None),
        }
    }

    async fn list_requisitions(&self, filter: &RequisitionFilter) -> Result<Vec<Requisition>, AppError> {
        // Filtro ausente = parâmetro NULL; LIMIT NULL devolve tudo
        let pattern = filter.search.as_ref().map(|term| format!("%{term}%"));
        let mut list = sqlx::query_as::<_, Requisition>(concat!(
            "SELECT ",
            requisition_columns!(),
            r#"
            FROM requisitions
            WHERE ($1::requisition_status IS NULL OR status = $1)
              AND ($2::text IS NULL OR work_site_id = $2)
              AND ($3::uuid IS NULL OR buyer_id = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::text IS NULL OR description ILIKE $5 OR number ILIKE $5)
            ORDER BY created_at DESC, number DESC
            LIMIT $6
            "#
        ))
        .bind(filter.status)
        .bind(&filter.work_site_id)
        .bind(filter.buyer_id)
        .bind(filter.created_after)
        .bind(pattern)
        .bind(filter.limit.map(|limit| limit as i64))
        .fetch_all(&self.pool)
        .await?;

        load_items(&self.pool, &mut list).await?;
        Ok(list)
    }

    async fn transition_requisition(&self, transition: &Transition) -> Result<TransitionResult, AppError> {
        let mut tx = self.pool.begin().await?;

        let Some(result) = apply_transition(&mut tx, transition).await? else {
            tx.rollback().await?;
            let id = transition.requisition.id;
            return Err(cas_failure(&self.pool, "requisitions", "Requisição", id).await);
        };

        tx.commit().await?;
        Ok(result)
    }

    // =========================================================================
    //  COTAÇÕES
    // =========================================================================

    async fn create_quote(&self, quote: &Quote) -> Result<Quote, AppError> {
        insert_quote(&self.pool, quote).await
    }

    async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, AppError> {
        let found = sqlx::query_as::<_, Quote>(concat!(
            "SELECT ",
            quote_columns!(),
            " FROM quotes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(quote) = found else {
            return Ok(None);
        };
        let mut list = [quote];
        load_bids(&self.pool, &mut list).await?;
        let [quote] = list;
        Ok(Some(quote))
    }

    async fn list_quotes(&self, filter: &QuoteFilter) -> Result<Vec<Quote>, AppError> {
        let mut list = sqlx::query_as::<_, Quote>(concat!(
            "SELECT ",
            quote_columns!(),
            r#"
            FROM quotes
            WHERE ($1::uuid IS NULL OR requisition_id = $1)
              AND ($2::uuid IS NULL OR buyer_id = $2)
              AND ($3::quote_status IS NULL OR status = $3)
            ORDER BY created_at DESC
            "#
        ))
        .bind(filter.requisition_id)
        .bind(filter.buyer_id)
        .bind(filter.status)
        .fetch_all(&self.pool)
        .await?;

        load_bids(&self.pool, &mut list).await?;
        Ok(list)
    }

    async fn add_bid(
        &self,
        quote_id: Uuid,
        expected: QuoteStatus,
        bid: &SupplierBid,
    ) -> Result<SupplierBid, AppError> {
        let mut tx = self.pool.begin().await?;

        // A revisão sobe junto com o status: uma conclusão que leu antes desta proposta falha
        let moved = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE quotes SET status = 'em_andamento', revision = revision + 1, updated_at = $3
            WHERE id = $1 AND status = $2
            RETURNING id
            "#,
        )
        .bind(quote_id)
        .bind(expected)
        .bind(bid.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        if moved.is_none() {
            tx.rollback().await?;
            return Err(cas_failure(&self.pool, "quotes", "Cotação", quote_id).await);
        }

        // A linha da cotação já está travada pelo UPDATE acima
        let position = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM supplier_bids WHERE quote_id = $1",
        )
        .bind(quote_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut bid = bid.clone();
        bid.quote_id = quote_id;
        bid.position = position;
        let saved = insert_bid(&mut tx, &bid).await?;

        tx.commit().await?;
        Ok(saved)
    }

    async fn conclude_quote(&self, write: &QuoteConclusionWrite) -> Result<ConcludedQuote, AppError> {
        let quote = &write.quote;
        let mut tx = self.pool.begin().await?;

        // 1. Compare-and-swap no status e na revisão lida: só um chamador conclui,
        //    e nunca sobre um conjunto de propostas desatualizado
        let updated = sqlx::query_as::<_, Quote>(concat!(
            r#"
            UPDATE quotes SET
                status = $4, selected_bid_id = $5, selected_supplier = $6,
                selected_value = $7, observation = $8, concluded_at = $9, updated_at = $10,
                revision = revision + 1
            WHERE id = $1 AND status = $2 AND revision = $3
            RETURNING "#,
            quote_columns!()
        ))
        .bind(quote.id)
        .bind(write.expected)
        .bind(quote.revision)
        .bind(quote.status)
        .bind(quote.selected_bid_id)
        .bind(&quote.selected_supplier)
        .bind(quote.selected_value)
        .bind(&quote.observation)
        .bind(quote.concluded_at)
        .bind(quote.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut updated) = updated else {
            tx.rollback().await?;
            return Err(cas_failure(&self.pool, "quotes", "Cotação", quote.id).await);
        };

        // 2. Substitui as propostas pelas finais (com o vencedor marcado)
        sqlx::query("DELETE FROM supplier_bids WHERE quote_id = $1")
            .bind(quote.id)
            .execute(&mut *tx)
            .await?;
        for bid in &write.bids {
            updated.bids.push(insert_bid(&mut tx, bid).await?);
        }

        // 3. Requisição na mesma transação
        let transition = match &write.transition {
            Some(transition) => match apply_transition(&mut tx, transition).await? {
                Some(result) => Some(result),
                None => {
                    tx.rollback().await?;
                    let id = transition.requisition.id;
                    return Err(cas_failure(&self.pool, "requisitions", "Requisição", id).await);
                }
            },
            None => None,
        };

        tx.commit().await?;
        Ok(ConcludedQuote { quote: updated, transition })
    }

    // =========================================================================
    //  APROVAÇÕES
    // =========================================================================

    async fn create_approval(&self, approval: &Approval) -> Result<Approval, AppError> {
        insert_approval(&self.pool, approval).await
    }

    async fn get_approval_by_token(&self, token: &str) -> Result<Option<Approval>, AppError> {
        let found = sqlx::query_as::<_, Approval>(concat!(
            "SELECT ",
            approval_columns!(),
            " FROM approvals WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found)
    }

    async fn list_approvals(&self, filter: &ApprovalFilter) -> Result<Vec<Approval>, AppError> {
        let list = sqlx::query_as::<_, Approval>(concat!(
            "SELECT ",
            approval_columns!(),
            r#"
            FROM approvals
            WHERE ($1::uuid IS NULL OR requisition_id = $1)
              AND ($2::approval_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#
        ))
        .bind(filter.requisition_id)
        .bind(filter.status)
        .fetch_all(&self.pool)
        .await?;
        Ok(list)
    }

    async fn update_approval_status(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        update: &ApprovalUpdate,
    ) -> Result<Approval, AppError> {
        let updated = sqlx::query_as::<_, Approval>(concat!(
            r#"
            UPDATE approvals SET
                status = $3,
                observation = COALESCE($4, observation),
                decided_at = $5
            WHERE id = $1 AND status = $2
            RETURNING "#,
            approval_columns!()
        ))
        .bind(id)
        .bind(expected)
        .bind(update.status)
        .bind(&update.observation)
        .bind(update.decided_at)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(approval) => Ok(approval),
            None => Err(cas_failure(&self.pool, "approvals", "Aprovação", id).await),
        }
    }

    // =========================================================================
    //  CADASTROS
    // =========================================================================

    async fn list_approvers(&self, tier: Tier) -> Result<Vec<Approver>, AppError> {
        let approvers = sqlx::query_as::<_, Approver>(
            r#"
            SELECT id, name, email, tier, active
            FROM approvers
            WHERE active AND tier = $1
            ORDER BY name ASC
            "#,
        )
        .bind(tier)
        .fetch_all(&self.pool)
        .await?;
        Ok(approvers)
    }

    async fn get_buyer(&self, id: Uuid) -> Result<Option<Buyer>, AppError> {
        let buyer = sqlx::query_as::<_, Buyer>("SELECT id, name, email, active FROM buyers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(buyer)
    }
}

#[async_trait]
impl RequisitionNumbering for PgStore {
    async fn next_number(&self, at: DateTime<Utc>) -> Result<String, AppError> {
        // Upsert atômico: o próprio Postgres serializa os incrementos do mesmo mês
        let sequence = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO requisition_sequences (period, last_value)
            VALUES ($1, 1)
            ON CONFLICT (period) DO UPDATE SET last_value = requisition_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(sequence_period(at))
        .fetch_one(&self.pool)
        .await?;

        Ok(format_requisition_number(at, sequence as u32))
    }
}
