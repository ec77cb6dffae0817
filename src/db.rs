pub mod store;
pub use store::{
    ApprovalFilter, ApprovalUpdate, ConcludedQuote, PurchasingStore, QuoteConclusionWrite,
    QuoteFilter, RequisitionFilter, RequisitionNumbering, Transition, TransitionEffects,
    TransitionResult,
};

pub mod memory_store;
pub use memory_store::MemoryStore;

pub mod postgres_store;
pub use postgres_store::PgStore;
