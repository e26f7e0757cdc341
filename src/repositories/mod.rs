pub mod password_reset_token;
pub mod two_factor_token;
pub mod user;

pub use password_reset_token::PasswordResetTokenRepository;
pub use two_factor_token::TwoFactorTokenRepository;
pub use user::{NewUser, UserRepository};
