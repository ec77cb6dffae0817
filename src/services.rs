pub mod approval_service;
pub mod authority;
pub mod dashboard_service;
pub mod quote_service;
pub mod requisition_service;
pub mod workflow;
