// src/models/quote.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::requisition::{validate_not_negative, validate_positive, Requisition};

// --- Enums ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "quote_status")]
pub enum QuoteStatus {
    #[serde(rename = "pendente")]
    #[sqlx(rename = "pendente")]
    Pending,
    #[serde(rename = "em_andamento")]
    #[sqlx(rename = "em_andamento")]
    InProgress,
    #[serde(rename = "concluida")]
    #[sqlx(rename = "concluida")]
    Concluded,
    #[serde(rename = "cancelada")]
    #[sqlx(rename = "cancelada")]
    Cancelled,
}

impl QuoteStatus {
    pub fn is_open(self) -> bool {
        matches!(self, QuoteStatus::Pending | QuoteStatus::InProgress)
    }
}

// --- Structs ---

/// Preço de um item dentro da proposta de um fornecedor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BidItemPrice {
    pub description: String,
    #[validate(custom(function = "validate_positive"))]
    pub quantity: Decimal,
    #[validate(custom(function = "validate_not_negative"))]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SupplierBid {
    pub id: Uuid,
    pub quote_id: Uuid,
    #[schema(example = "Eletro Minas Ltda")]
    pub supplier_name: String,
    pub contact: Option<String>,
    #[schema(example = "28500.00")]
    pub total_value: Decimal,
    #[schema(example = 15)]
    pub lead_time_days: Option<i32>,
    #[schema(example = "30/60 dias")]
    pub payment_terms: Option<String>,
    #[sqlx(json)]
    pub item_prices: Vec<BidItemPrice>,
    pub selected: bool,
    // Ordem de cadastro: critério de desempate
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

impl SupplierBid {
    /// Proposta válida: fornecedor identificado e valor total positivo.
    pub fn is_valid(&self) -> bool {
        !self.supplier_name.trim().is_empty() && self.total_value > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: Uuid,
    // Referência fraca: a requisição pode não existir mais
    pub requisition_id: Uuid,
    pub buyer_id: Option<Uuid>,
    pub status: QuoteStatus,
    pub selected_bid_id: Option<Uuid>,
    pub selected_supplier: Option<String>,
    pub selected_value: Option<Decimal>,
    pub observation: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub concluded_at: Option<DateTime<Utc>>,
    /// Incrementada a cada proposta gravada. A conclusão só vale sobre a revisão que leu.
    pub revision: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[sqlx(skip)]
    pub bids: Vec<SupplierBid>,
}

/// Comprador (equipe de compras).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Buyer {
    pub id: Uuid,
    #[schema(example = "Aline")]
    pub name: String,
    pub email: String,
    pub active: bool,
}

/// Visão de leitura: cotação + requisição (quando encontrada) + comprador.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteDetail {
    #[serde(flatten)]
    pub quote: Quote,
    pub requisition: Option<Requisition>,
    pub buyer_name: Option<String>,
}

// --- Payloads ---

fn validate_not_blank(val: &str) -> Result<(), ValidationError> {
    if val.trim().is_empty() {
        let mut err = ValidationError::new("length");
        err.message = Some("O nome do fornecedor é obrigatório.".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewBidPayload {
    #[validate(custom(function = "validate_not_blank"))]
    pub supplier_name: String,

    pub contact: Option<String>,

    #[validate(custom(function = "validate_positive"))]
    pub total_value: Decimal,

    #[validate(range(min = 0, message = "O prazo de entrega não pode ser negativo."))]
    pub lead_time_days: Option<i32>,

    pub payment_terms: Option<String>,

    #[validate(nested)]
    #[serde(default)]
    pub item_prices: Vec<BidItemPrice>,
}

// As propostas inválidas da lista são descartadas na conclusão (mínimo de 2 válidas).
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConcludeQuotePayload {
    #[serde(default)]
    pub bids: Vec<NewBidPayload>,
    pub observation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteForQuotingPayload {
    pub buyer_id: Uuid,
    pub deadline: Option<DateTime<Utc>>,
}
