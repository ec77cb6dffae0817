// src/services/workflow.rs

use std::fmt;

use serde::Serialize;

use crate::{common::error::AppError, models::requisition::RequisitionStatus};

/// Eventos que movem uma requisição pelo fluxo de compras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Alteração de itens/valor: não muda o status, só é aceita antes da aprovação.
    Revise,
    Submit,
    RouteForApproval,
    Approve,
    Reject,
    RouteForQuoting,
    /// `reapproval`: o vencedor da cotação exige alçada maior que a aprovada.
    ConcludeQuoting { reapproval: bool },
    Purchase,
    Cancel,
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowEvent::Revise => "alterar itens",
            WorkflowEvent::Submit => "enviar",
            WorkflowEvent::RouteForApproval => "encaminhar para aprovação",
            WorkflowEvent::Approve => "aprovar",
            WorkflowEvent::Reject => "rejeitar",
            WorkflowEvent::RouteForQuoting => "encaminhar para cotação",
            WorkflowEvent::ConcludeQuoting { .. } => "concluir cotação",
            WorkflowEvent::Purchase => "comprar",
            WorkflowEvent::Cancel => "cancelar",
        };
        f.write_str(name)
    }
}

/// Tabela de transições. Qualquer par (estado, evento) fora dela é `InvalidTransition`,
/// inclusive repetir um evento já aplicado.
pub fn next_status(
    from: RequisitionStatus,
    event: WorkflowEvent,
) -> Result<RequisitionStatus, AppError> {
    use RequisitionStatus as S;
    use WorkflowEvent as E;

    let to = match (from, event) {
        (from, E::Revise) if from.is_editable() => Some(from),
        (S::Draft, E::Submit) => Some(S::Pending),
        (S::Pending, E::RouteForApproval) => Some(S::AwaitingApproval),
        (S::AwaitingApproval, E::Approve) => Some(S::Approved),
        (S::AwaitingApproval, E::Reject) => Some(S::Rejected),
        (S::Approved, E::RouteForQuoting) => Some(S::Quoting),
        (S::Quoting, E::ConcludeQuoting { reapproval: false }) => Some(S::Approved),
        (S::Quoting, E::ConcludeQuoting { reapproval: true }) => Some(S::AwaitingApproval),
        (S::Approved, E::Purchase) => Some(S::Purchased),
        (from, E::Cancel) if !from.is_terminal() => Some(S::Cancelled),
        _ => None,
    };

    to.ok_or(AppError::InvalidTransition { from, event })
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequisitionStatus as S;

    const EVENTS: [WorkflowEvent; 10] = [
        WorkflowEvent::Revise,
        WorkflowEvent::Submit,
        WorkflowEvent::RouteForApproval,
        WorkflowEvent::Approve,
        WorkflowEvent::Reject,
        WorkflowEvent::RouteForQuoting,
        WorkflowEvent::ConcludeQuoting { reapproval: false },
        WorkflowEvent::ConcludeQuoting { reapproval: true },
        WorkflowEvent::Purchase,
        WorkflowEvent::Cancel,
    ];

    fn allowed() -> Vec<(S, WorkflowEvent, S)> {
        let mut table = vec![
            (S::Draft, WorkflowEvent::Revise, S::Draft),
            (S::Pending, WorkflowEvent::Revise, S::Pending),
            (S::Draft, WorkflowEvent::Submit, S::Pending),
            (S::Pending, WorkflowEvent::RouteForApproval, S::AwaitingApproval),
            (S::AwaitingApproval, WorkflowEvent::Approve, S::Approved),
            (S::AwaitingApproval, WorkflowEvent::Reject, S::Rejected),
            (S::Approved, WorkflowEvent::RouteForQuoting, S::Quoting),
            (S::Quoting, WorkflowEvent::ConcludeQuoting { reapproval: false }, S::Approved),
            (S::Quoting, WorkflowEvent::ConcludeQuoting { reapproval: true }, S::AwaitingApproval),
            (S::Approved, WorkflowEvent::Purchase, S::Purchased),
        ];
        for from in [S::Draft, S::Pending, S::AwaitingApproval, S::Approved, S::Quoting] {
            table.push((from, WorkflowEvent::Cancel, S::Cancelled));
        }
        table
    }

    #[test]
    fn every_pair_outside_the_table_is_rejected() {
        let table = allowed();
        for from in S::ALL {
            for event in EVENTS {
                let expected = table
                    .iter()
                    .find(|(f, e, _)| *f == from && *e == event)
                    .map(|(_, _, to)| *to);
                match (next_status(from, event), expected) {
                    (Ok(to), Some(exp)) => assert_eq!(to, exp, "{from} + {event}"),
                    (Err(AppError::InvalidTransition { from: f, event: e }), None) => {
                        assert_eq!(f, from);
                        assert_eq!(e, event);
                    }
                    (result, exp) => panic!("{from} + {event}: {result:?}, esperado {exp:?}"),
                }
            }
        }
    }

    #[test]
    fn approve_cannot_skip_the_approval_state() {
        assert!(matches!(
            next_status(S::Pending, WorkflowEvent::Approve),
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn repeating_an_event_fails_instead_of_doing_nothing() {
        let approved = next_status(S::AwaitingApproval, WorkflowEvent::Approve).unwrap();
        assert!(next_status(approved, WorkflowEvent::Approve).is_err());
        let cancelled = next_status(S::Pending, WorkflowEvent::Cancel).unwrap();
        assert!(next_status(cancelled, WorkflowEvent::Cancel).is_err());
    }

    #[test]
    fn items_are_frozen_once_approval_starts() {
        assert!(next_status(S::AwaitingApproval, WorkflowEvent::Revise).is_err());
        assert!(next_status(S::Approved, WorkflowEvent::Revise).is_err());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for from in [S::Purchased, S::Rejected, S::Cancelled] {
            for event in EVENTS {
                assert!(next_status(from, event).is_err());
            }
        }
    }
}
