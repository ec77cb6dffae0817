// src/services/authority.rs

use rust_decimal::Decimal;

use crate::{common::error::AppError, models::tier::Tier};

/// Tabela de alçadas: limites superiores (inclusivos) das alçadas 1 a 3.
/// A alçada 4 (CEO) não tem limite.
///
/// Regra de fronteira: o valor pertence à menor alçada cujo limite é
/// maior ou igual a ele. "Até R$ 5.000" inclui os R$ 5.000,00.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    coordinator: Decimal,
    manager: Decimal,
    director: Decimal,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            coordinator: Decimal::from(5_000),
            manager: Decimal::from(25_000),
            director: Decimal::from(100_000),
        }
    }
}

impl TierTable {
    pub fn new(coordinator: Decimal, manager: Decimal, director: Decimal) -> Result<Self, AppError> {
        if coordinator <= Decimal::ZERO || coordinator >= manager || manager >= director {
            return Err(AppError::InvalidValue(format!(
                "limites de alçada devem ser positivos e crescentes ({coordinator}, {manager}, {director})"
            )));
        }
        Ok(Self { coordinator, manager, director })
    }

    /// Limite da alçada; `None` para alçada sem teto (CEO) ou sem alçada.
    pub fn limit(&self, tier: Tier) -> Option<Decimal> {
        match tier {
            Tier::Unassigned | Tier::Executive => None,
            Tier::Coordinator => Some(self.coordinator),
            Tier::Manager => Some(self.manager),
            Tier::Director => Some(self.director),
        }
    }

    /// Resolve a alçada exigida para um valor estimado.
    pub fn resolve(&self, value: Decimal) -> Result<Tier, AppError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AppError::negative_value(value));
        }

        // Varredura em ordem crescente: primeira alçada cujo limite comporta o valor
        let tier = [Tier::Coordinator, Tier::Manager, Tier::Director]
            .into_iter()
            .find(|tier| self.limit(*tier).is_some_and(|limit| value <= limit))
            .unwrap_or(Tier::Executive);

        Ok(tier)
    }
}
