//! Repositories: one zero-sized struct per table with associated async fns.
//!
//! Single-statement functions are generic over [`sqlx::PgExecutor`] so they
//! run equally against the pool or inside a transaction. Functions that need
//! several statements take `&mut PgConnection` and must be called inside a
//! transaction opened by [`crate::with_tx`].

pub mod credit_repo;
pub mod generation_model_repo;
pub mod job_repo;
pub mod user_repo;

pub use credit_repo::{CreditRepo, CreditTypeRepo};
pub use generation_model_repo::GenerationModelRepo;
pub use job_repo::JobRepo;
pub use user_repo::UserRepo;
