pub mod password_reset_token;
pub mod two_factor_token;
pub mod user;

pub use password_reset_token::PasswordResetToken;
pub use two_factor_token::{TokenKind, TwoFactorToken};
pub use user::{TrustedDevice, User, UserRole};
