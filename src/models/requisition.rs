// src/models/requisition.rs

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::common::error::AppError;
use crate::models::tier::Tier;

// --- Enums ---

// Os valores do banco e do JSON seguem o vocabulário do negócio (rascunho, pendente, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "requisition_status")]
pub enum RequisitionStatus {
    #[serde(rename = "rascunho")]
    #[sqlx(rename = "rascunho")]
    Draft,
    #[serde(rename = "pendente")]
    #[sqlx(rename = "pendente")]
    Pending,
    #[serde(rename = "em_aprovacao")]
    #[sqlx(rename = "em_aprovacao")]
    AwaitingApproval,
    #[serde(rename = "aprovada")]
    #[sqlx(rename = "aprovada")]
    Approved,
    #[serde(rename = "rejeitada")]
    #[sqlx(rename = "rejeitada")]
    Rejected,
    #[serde(rename = "em_cotacao")]
    #[sqlx(rename = "em_cotacao")]
    Quoting,
    #[serde(rename = "comprada")]
    #[sqlx(rename = "comprada")]
    Purchased,
    #[serde(rename = "cancelada")]
    #[sqlx(rename = "cancelada")]
    Cancelled,
}

impl RequisitionStatus {
    pub const ALL: [RequisitionStatus; 8] = [
        RequisitionStatus::Draft,
        RequisitionStatus::Pending,
        RequisitionStatus::AwaitingApproval,
        RequisitionStatus::Approved,
        RequisitionStatus::Rejected,
        RequisitionStatus::Quoting,
        RequisitionStatus::Purchased,
        RequisitionStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequisitionStatus::Draft => "rascunho",
            RequisitionStatus::Pending => "pendente",
            RequisitionStatus::AwaitingApproval => "em_aprovacao",
            RequisitionStatus::Approved => "aprovada",
            RequisitionStatus::Rejected => "rejeitada",
            RequisitionStatus::Quoting => "em_cotacao",
            RequisitionStatus::Purchased => "comprada",
            RequisitionStatus::Cancelled => "cancelada",
        }
    }

    /// Estados sem saída: nenhuma transição é aceita a partir deles.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequisitionStatus::Purchased | RequisitionStatus::Rejected | RequisitionStatus::Cancelled
        )
    }

    /// Itens e valor só podem ser alterados antes do envio para aprovação.
    pub fn is_editable(self) -> bool {
        matches!(self, RequisitionStatus::Draft | RequisitionStatus::Pending)
    }
}

impl fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "urgency", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Normal,
    Urgente,
    Critica,
}

// --- Validações customizadas ---

pub(crate) fn validate_not_negative(val: &Decimal) -> Result<(), ValidationError> {
    if val.is_sign_negative() && !val.is_zero() {
        let mut err = ValidationError::new("range");
        err.message = Some("O valor não pode ser negativo.".into());
        return Err(err);
    }
    Ok(())
}

pub(crate) fn validate_positive(val: &Decimal) -> Result<(), ValidationError> {
    if *val <= Decimal::ZERO {
        let mut err = ValidationError::new("range");
        err.message = Some("O valor deve ser maior que zero.".into());
        return Err(err);
    }
    Ok(())
}

// --- Itens ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequisitionItem {
    #[validate(length(min = 1, message = "A descrição do item é obrigatória."))]
    #[schema(example = "Cabo XLPE 15kV 50mm2")]
    pub description: String,

    #[validate(custom(function = "validate_positive"))]
    #[schema(example = "500")]
    pub quantity: Decimal,

    #[validate(length(min = 1, message = "A unidade é obrigatória."))]
    #[schema(example = "m")]
    pub unit: String,

    #[validate(custom(function = "validate_not_negative"))]
    #[schema(example = "38.50")]
    pub unit_value: Decimal,
}

impl RequisitionItem {
    /// `None` quando o produto não cabe num Decimal.
    pub fn total(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_value)
    }
}

/// Soma `quantidade × valor unitário` de todos os itens.
pub fn items_total(items: &[RequisitionItem]) -> Result<Decimal, AppError> {
    items.iter().try_fold(Decimal::ZERO, |acc, item| {
        item.total()
            .and_then(|total| acc.checked_add(total))
            .ok_or_else(|| {
                AppError::InvalidValue(format!(
                    "o total dos itens excede o limite suportado (item '{}')",
                    item.description
                ))
            })
    })
}

// --- Requisição ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Requisition {
    pub id: Uuid,
    #[schema(example = "RC-202602-0012")]
    pub number: String,
    pub requester_id: Option<Uuid>,
    #[schema(example = "Carlos Silva")]
    pub requester_name: String,
    #[schema(example = "FRUTAL")]
    pub work_site_id: Option<String>,
    #[schema(example = "SE Frutal")]
    pub work_site_name: String,
    pub description: String,
    pub justification: Option<String>,
    pub urgency: Urgency,
    #[schema(example = "eletrico")]
    pub category: Option<String>,
    #[schema(example = "20150.00")]
    pub estimated_value: Decimal,
    pub status: RequisitionStatus,
    #[schema(value_type = i16, example = 2)]
    pub approval_tier: Tier,
    pub buyer_id: Option<Uuid>,
    pub original_text: Option<String>,
    pub needed_by: Option<NaiveDate>,
    pub approval_requested_at: Option<DateTime<Utc>>,
    pub approval_resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Preenchido pelo repositório numa segunda consulta
    #[sqlx(skip)]
    pub items: Vec<RequisitionItem>,
}

impl Requisition {
    /// Campos exigidos para sair do rascunho.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.requester_name.trim().is_empty() {
            missing.push("requesterName");
        }
        if self.work_site_name.trim().is_empty() {
            missing.push("workSiteName");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        if self.items.is_empty() && self.estimated_value.is_zero() {
            missing.push("items");
        }
        missing
    }

    /// Horas entre a entrada em aprovação e a decisão, quando ambas existem.
    pub fn approval_hours(&self) -> Option<f64> {
        let (start, end) = (self.approval_requested_at?, self.approval_resolved_at?);
        let seconds = (end - start).num_seconds();
        if seconds < 0 {
            return None;
        }
        Some(seconds as f64 / 3600.0)
    }
}

// --- Payloads ---

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRequisitionPayload {
    // Se vier vazio, usamos o nome do usuário autenticado
    #[serde(default)]
    pub requester_name: String,

    pub work_site_id: Option<String>,

    #[serde(default)]
    #[schema(example = "SE Frutal")]
    pub work_site_name: String,

    #[serde(default)]
    #[schema(example = "Cabos XLPE 15kV 50mm2 - Fase 2")]
    pub description: String,

    pub justification: Option<String>,

    pub category: Option<String>,

    #[serde(default)]
    pub urgency: Urgency,

    pub needed_by: Option<NaiveDate>,

    #[validate(nested)]
    #[serde(default)]
    pub items: Vec<RequisitionItem>,

    // Só é usado quando a requisição não tem itens
    #[validate(custom(function = "validate_not_negative"))]
    pub estimated_value: Option<Decimal>,

    pub original_text: Option<String>,

    /// Salva como rascunho mesmo que esteja completa.
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviseRequisitionPayload {
    #[validate(nested)]
    #[serde(default)]
    pub items: Vec<RequisitionItem>,

    #[validate(custom(function = "validate_not_negative"))]
    pub estimated_value: Option<Decimal>,

    pub description: Option<String>,
    pub justification: Option<String>,
    pub urgency: Option<Urgency>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(qty: i64, unit_cents: i64) -> RequisitionItem {
        RequisitionItem {
            description: "Item".into(),
            quantity: Decimal::from(qty),
            unit: "un".into(),
            unit_value: Decimal::new(unit_cents, 2),
        }
    }

    #[test]
    fn items_total_sums_quantity_times_unit_value() {
        let items = vec![item(500, 3850), item(20, 4500)];
        assert_eq!(items_total(&items).unwrap(), Decimal::from(20150));
        assert_eq!(items_total(&[]).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn items_total_overflow_is_an_invalid_value() {
        let huge = RequisitionItem {
            description: "Transformador".into(),
            quantity: Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0),
            unit: "un".into(),
            unit_value: Decimal::from(10_000_000_000i64),
        };
        assert!(huge.total().is_none());
        assert!(matches!(items_total(&[huge]), Err(AppError::InvalidValue(_))));

        // Cada produto cabe, a soma não
        let max = RequisitionItem {
            description: "Lote".into(),
            quantity: Decimal::ONE,
            unit: "un".into(),
            unit_value: Decimal::MAX,
        };
        assert!(matches!(items_total(&[max.clone(), max]), Err(AppError::InvalidValue(_))));
    }

    #[test]
    fn item_validation_rejects_zero_quantity_and_negative_price() {
        let mut bad = item(0, 100);
        assert!(bad.validate().is_err());
        bad.quantity = Decimal::ONE;
        bad.unit_value = Decimal::new(-1, 0);
        assert!(bad.validate().is_err());
        bad.unit_value = Decimal::ZERO;
        assert!(bad.validate().is_ok());
    }

    #[test]
    fn status_serializes_with_business_vocabulary() {
        let json = serde_json::to_string(&RequisitionStatus::AwaitingApproval).unwrap();
        assert_eq!(json, "\"em_aprovacao\"");
        let parsed: RequisitionStatus = serde_json::from_str("\"em_cotacao\"").unwrap();
        assert_eq!(parsed, RequisitionStatus::Quoting);
        assert_eq!(RequisitionStatus::Cancelled.to_string(), "cancelada");
    }

    #[test]
    fn terminal_states_are_purchased_rejected_cancelled() {
        let terminal: Vec<_> = RequisitionStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                RequisitionStatus::Rejected,
                RequisitionStatus::Purchased,
                RequisitionStatus::Cancelled
            ]
        );
    }
}
