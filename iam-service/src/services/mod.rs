//! Services layer for iam-service.
//!
//! Credential store, second-factor manager, policy evaluator, session issuer
//! and the tenant-scoped directory, all sharing one `IamStore` handle.

pub mod audit;
mod database;
pub mod directory;
pub mod error;
mod jwt;
pub mod memory;
pub mod policy;
pub mod registration;
pub mod second_factor;
pub mod seeds;
pub mod session;
pub mod store;

pub use audit::AuditSink;
pub use database::PgStore;
pub use directory::{DirectoryService, NewPolicy, StatementSpec};
pub use error::ServiceError;
pub use jwt::{IssuedToken, JwtService, SessionClaims, TokenKind};
pub use memory::MemoryStore;
pub use policy::PolicyEvaluator;
pub use registration::{NewMember, RegisterCommand, Registration, RegistrationService};
pub use second_factor::{ProvisionedSecret, SecondFactorManager};
pub use session::{LoginCommand, LoginOutcome, SessionService};
pub use store::{IamStore, PolicyTarget, StoreError};
