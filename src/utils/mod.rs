pub mod fingerprint;
pub mod password;
pub mod validation;

pub use fingerprint::{client_ip, derive_fingerprint, extract_device_metadata};
pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use validation::ValidatedJson;
