pub mod approval;
pub mod auth;
pub mod dashboard;
pub mod quote;
pub mod requisition;
pub mod tier;
