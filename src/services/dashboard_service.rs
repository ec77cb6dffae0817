// src/services/dashboard_service.rs

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{ApprovalFilter, PurchasingStore, RequisitionFilter},
    models::{
        approval::{Approval, ApprovalStatus},
        dashboard::{
            BuyerGroup, DashboardData, DashboardKpis, DashboardPeriod, DashboardQuery,
            StatusGroup, WorkSiteGroup,
        },
        requisition::{Requisition, RequisitionStatus},
    },
};

const RECENT_LIMIT: usize = 5;

/// Estados que contam como "aprovada" nos indicadores: a aprovação já aconteceu.
fn counts_as_approved(status: RequisitionStatus) -> bool {
    matches!(
        status,
        RequisitionStatus::Approved | RequisitionStatus::Quoting | RequisitionStatus::Purchased
    )
}

fn is_pending(status: RequisitionStatus) -> bool {
    matches!(status, RequisitionStatus::Pending | RequisitionStatus::AwaitingApproval)
}

/// Agregação pura do painel sobre um retrato das requisições e aprovações.
///
/// Só entram requisições criadas dentro da janela do período (terminando em `now`).
/// As aprovações pendentes listadas são as dessas requisições.
pub fn aggregate(
    requisitions: &[Requisition],
    approvals: &[Approval],
    period: DashboardPeriod,
    now: DateTime<Utc>,
) -> DashboardData {
    let start = period.starts_at(now);
    let mut in_window: Vec<&Requisition> = requisitions
        .iter()
        .filter(|r| r.created_at >= start && r.created_at <= now)
        .collect();
    in_window.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    // 1. KPIs
    let mut kpis = DashboardKpis::default();
    let mut approval_hours = Vec::new();
    for r in &in_window {
        kpis.total += 1;
        kpis.total_value += r.estimated_value;
        match r.status {
            RequisitionStatus::AwaitingApproval => kpis.awaiting_approval += 1,
            RequisitionStatus::Rejected => kpis.rejected += 1,
            s if counts_as_approved(s) => kpis.approved += 1,
            _ => {}
        }
        if let Some(hours) = r.approval_hours() {
            approval_hours.push(hours);
        }
    }
    if !approval_hours.is_empty() {
        let mean = approval_hours.iter().sum::<f64>() / approval_hours.len() as f64;
        kpis.average_approval_hours = (mean * 10.0).round() / 10.0;
    }

    // 2. Por status (na ordem do fluxo)
    let by_status = RequisitionStatus::ALL
        .into_iter()
        .filter_map(|status| {
            let group: Vec<_> = in_window.iter().filter(|r| r.status == status).collect();
            (!group.is_empty()).then(|| StatusGroup {
                status,
                total: group.len() as u64,
                value: group.iter().map(|r| r.estimated_value).sum(),
            })
        })
        .collect();

    // 3. Por obra
    let mut by_work_site: Vec<WorkSiteGroup> = Vec::new();
    for r in &in_window {
        let idx = match by_work_site.iter().position(|g| g.work_site_name == r.work_site_name) {
            Some(idx) => idx,
            None => {
                by_work_site.push(WorkSiteGroup {
                    work_site_name: r.work_site_name.clone(),
                    total: 0,
                    value: Decimal::ZERO,
                    pending: 0,
                });
                by_work_site.len() - 1
            }
        };
        let group = &mut by_work_site[idx];
        group.total += 1;
        group.value += r.estimated_value;
        if is_pending(r.status) {
            group.pending += 1;
        }
    }
    by_work_site.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.work_site_name.cmp(&b.work_site_name)));

    // 4. Por comprador
    let mut by_buyer: Vec<BuyerGroup> = Vec::new();
    for r in &in_window {
        let Some(buyer_id) = r.buyer_id else { continue };
        let idx = match by_buyer.iter().position(|g| g.buyer_id == buyer_id) {
            Some(idx) => idx,
            None => {
                by_buyer.push(BuyerGroup { buyer_id, total: 0, value: Decimal::ZERO, quoting: 0 });
                by_buyer.len() - 1
            }
        };
        let group = &mut by_buyer[idx];
        group.total += 1;
        group.value += r.estimated_value;
        if r.status == RequisitionStatus::Quoting {
            group.quoting += 1;
        }
    }
    by_buyer.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.buyer_id.cmp(&b.buyer_id)));

    // 5. Listas
    let ids: HashSet<Uuid> = in_window.iter().map(|r| r.id).collect();
    let pending_approvals = approvals
        .iter()
        .filter(|a| a.status == ApprovalStatus::Pending && ids.contains(&a.requisition_id))
        .cloned()
        .collect();
    let recent_requisitions = in_window.iter().take(RECENT_LIMIT).map(|r| (*r).clone()).collect();

    DashboardData {
        kpis,
        by_status,
        by_work_site,
        by_buyer,
        recent_requisitions,
        pending_approvals,
    }
}

#[derive(Clone)]
pub struct DashboardService {
    store: Arc<dyn PurchasingStore>,
}

impl DashboardService {
    pub fn new(store: Arc<dyn PurchasingStore>) -> Self {
        Self { store }
    }

    pub async fn summary(&self, query: &DashboardQuery) -> Result<DashboardData, AppError> {
        let now = Utc::now();
        let filter = RequisitionFilter {
            work_site_id: query.work_site_id.clone(),
            created_after: Some(query.period.starts_at(now)),
            ..Default::default()
        };
        let requisitions = self.store.list_requisitions(&filter).await?;
        let approvals = self
            .store
            .list_approvals(&ApprovalFilter {
                requisition_id: None,
                status: Some(ApprovalStatus::Pending),
            })
            .await?;

        Ok(aggregate(&requisitions, &approvals, query.period, now))
    }
}
