mod audit;
mod secret;

pub use audit::SecretAuditDao;
pub use secret::SecretDao;
