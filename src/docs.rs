// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use crate::handlers;
use crate::models;
use crate::services;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Requisições ---
        handlers::requisitions::create_requisition,
        handlers::requisitions::list_requisitions,
        handlers::requisitions::get_requisition,
        handlers::requisitions::revise_requisition,
        handlers::requisitions::submit_requisition,
        handlers::requisitions::route_for_approval,
        handlers::requisitions::route_for_quoting,
        handlers::requisitions::purchase_requisition,
        handlers::requisitions::cancel_requisition,

        // --- Cotações ---
        handlers::quotes::list_quotes,
        handlers::quotes::get_quote,
        handlers::quotes::register_bid,
        handlers::quotes::conclude_quote,

        // --- Aprovações ---
        handlers::approvals::list_pending,
        handlers::approvals::get_by_token,
        handlers::approvals::process_decision,

        // --- Painel ---
        handlers::dashboard::get_dashboard,
    ),
    components(
        schemas(
            // --- Requisições ---
            models::requisition::RequisitionStatus,
            models::requisition::Urgency,
            models::requisition::RequisitionItem,
            models::requisition::Requisition,
            models::requisition::NewRequisitionPayload,
            models::requisition::ReviseRequisitionPayload,
            handlers::requisitions::CancelRequisitionPayload,
            services::requisition_service::RoutedForApproval,
            services::requisition_service::RoutedForQuoting,
            services::requisition_service::QuotingConcluded,

            // --- Cotações ---
            models::quote::QuoteStatus,
            models::quote::BidItemPrice,
            models::quote::SupplierBid,
            models::quote::Quote,
            models::quote::Buyer,
            models::quote::QuoteDetail,
            models::quote::NewBidPayload,
            models::quote::ConcludeQuotePayload,
            models::quote::RouteForQuotingPayload,

            // --- Aprovações ---
            models::approval::ApprovalStatus,
            models::approval::Decision,
            models::approval::Approval,
            models::approval::PendingApproval,
            models::approval::DecisionPayload,
            services::approval_service::DecisionOutcome,

            // --- Painel ---
            models::dashboard::DashboardPeriod,
            models::dashboard::DashboardKpis,
            models::dashboard::StatusGroup,
            models::dashboard::WorkSiteGroup,
            models::dashboard::BuyerGroup,
            models::dashboard::DashboardData,
        )
    ),
    tags(
        (name = "Requisições", description = "Ciclo de vida das requisições de compra"),
        (name = "Cotações", description = "Propostas de fornecedores e escolha do vencedor"),
        (name = "Aprovações", description = "Decisões por token dentro das alçadas"),
        (name = "Painel", description = "Indicadores de compras")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_jwt",
            SecurityScheme::Http(
                Http::new(HttpAuthScheme::Bearer)
            ),
        );
    }
}
