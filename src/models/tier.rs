// src/models/tier.rs

use std::fmt;

use serde::{Deserialize, Serialize};

// --- Alçadas ---
// Conjunto fechado: todo `match` sobre Tier é verificado pelo compilador.
// No JSON e no banco a alçada trafega como número (0 a 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(into = "i16", try_from = "i16")]
#[repr(i16)]
pub enum Tier {
    /// Sem alçada: só existe como nível de aprovador, nunca de requisição.
    Unassigned = 0,
    Coordinator = 1,
    Manager = 2,
    Director = 3,
    Executive = 4,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Unassigned,
        Tier::Coordinator,
        Tier::Manager,
        Tier::Director,
        Tier::Executive,
    ];

    pub fn level(self) -> i16 {
        self as i16
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Unassigned => "Sem alçada",
            Tier::Coordinator => "Coordenador (até R$ 5.000)",
            Tier::Manager => "Gerente (até R$ 25.000)",
            Tier::Director => "Diretor (até R$ 100.000)",
            Tier::Executive => "CEO (sem limite)",
        }
    }

    /// Próxima alçada acima desta, se existir.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Unassigned => Some(Tier::Coordinator),
            Tier::Coordinator => Some(Tier::Manager),
            Tier::Manager => Some(Tier::Director),
            Tier::Director => Some(Tier::Executive),
            Tier::Executive => None,
        }
    }
}

impl From<Tier> for i16 {
    fn from(tier: Tier) -> Self {
        tier.level()
    }
}

impl TryFrom<i16> for Tier {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Tier::ALL
            .into_iter()
            .find(|t| t.level() == value)
            .ok_or_else(|| format!("alçada inexistente: {value}"))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{} - {}", self.level(), self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_roundtrips_through_level_number() {
        for tier in Tier::ALL {
            assert_eq!(Tier::try_from(tier.level()), Ok(tier));
        }
        assert!(Tier::try_from(5).is_err());
        assert!(Tier::try_from(-1).is_err());
    }

    #[test]
    fn tier_serializes_as_number() {
        let json = serde_json::to_string(&Tier::Manager).unwrap();
        assert_eq!(json, "2");
        let back: Tier = serde_json::from_str("3").unwrap();
        assert_eq!(back, Tier::Director);
    }

    #[test]
    fn tiers_are_ordered_by_authority() {
        assert!(Tier::Coordinator < Tier::Manager);
        assert!(Tier::Executive > Tier::Director);
        assert_eq!(Tier::Executive.next(), None);
        assert_eq!(Tier::Manager.next(), Some(Tier::Director));
    }
}
