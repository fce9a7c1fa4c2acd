pub mod refresh_token;
pub mod session;
pub mod tenant;
pub mod user;

pub use refresh_token::RefreshTokenRecord;
pub use session::{DeviceMetadata, SessionProvider, SessionRecord};
pub use tenant::{Tenant, TenantState};
pub use user::{User, UserProfile, UserStatus};
