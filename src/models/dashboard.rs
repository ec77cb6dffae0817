// src/models/dashboard.rs

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::models::{
    approval::Approval,
    requisition::{Requisition, RequisitionStatus},
};

// Janela de análise do painel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum DashboardPeriod {
    #[serde(rename = "semana")]
    Week,
    #[default]
    #[serde(rename = "mes")]
    Month,
    #[serde(rename = "trimestre")]
    Quarter,
}

impl DashboardPeriod {
    pub fn days(self) -> i64 {
        match self {
            DashboardPeriod::Week => 7,
            DashboardPeriod::Month => 30,
            DashboardPeriod::Quarter => 90,
        }
    }

    /// Início da janela (janela móvel terminando em `now`).
    pub fn starts_at(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days())
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DashboardQuery {
    #[serde(default, alias = "periodo")]
    #[param(value_type = Option<String>, example = "mes")]
    pub period: DashboardPeriod,
    #[serde(alias = "obra_id", alias = "obraId")]
    pub work_site_id: Option<String>,
}

// 1. Os cards do topo
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardKpis {
    pub total: u64,
    pub awaiting_approval: u64,
    pub approved: u64,
    pub rejected: u64,
    pub total_value: Decimal,
    pub average_approval_hours: f64,
}

// 2. Agrupamentos
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusGroup {
    pub status: RequisitionStatus,
    pub total: u64,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkSiteGroup {
    pub work_site_name: String,
    pub total: u64,
    pub value: Decimal,
    pub pending: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuyerGroup {
    pub buyer_id: Uuid,
    pub total: u64,
    pub value: Decimal,
    pub quoting: u64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub kpis: DashboardKpis,
    pub by_status: Vec<StatusGroup>,
    pub by_work_site: Vec<WorkSiteGroup>,
    pub by_buyer: Vec<BuyerGroup>,
    pub recent_requisitions: Vec<Requisition>,
    pub pending_approvals: Vec<Approval>,
}
