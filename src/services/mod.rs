pub mod audit;
pub mod authenticator;
pub mod coordinator;
pub mod directory;
pub mod jwt;
pub mod mfa;
pub mod permissions;
pub mod policy;
pub mod rate_limit;
pub mod session_registry;
pub mod token_store;
pub mod tokens;

pub use audit::{AuditEvent, AuditEventKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use authenticator::CredentialAuthenticator;
pub use coordinator::{CredentialBundle, SessionCoordinator};
pub use directory::{MemoryDirectory, PgDirectory, UserDirectory};
pub use jwt::{AccessTokenClaims, JwtService, MfaChallengeClaims};
pub use mfa::{MfaMethod, MfaMethodProvider, MockMfaProvider, PgMfaProvider};
pub use permissions::{merge_permissions, RoleCatalog};
pub use policy::{MfaPolicyEvaluation, MfaPolicyEvaluator};
pub use rate_limit::{AttemptLimiter, GovernorLimiter, RateDecision, StaticLimiter};
pub use session_registry::{MemorySessionRegistry, RedisSessionRegistry, SessionRegistry};
pub use token_store::{MemoryTokenStore, RedisTokenStore, RotateOutcome, TokenStore};
pub use tokens::{IntrospectionData, TokenLifecycleManager};
