// src/auth/mod.rs

pub mod jwt;
pub mod principal;
pub mod referral;
pub mod session;

pub use jwt::{create_token, verify_token, Claims};
pub use principal::PrincipalService;
pub use referral::ReferralKeyService;
pub use session::SessionService;
