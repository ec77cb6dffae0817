pub mod approvals;
pub mod dashboard;
pub mod quotes;
pub mod requisitions;
