pub mod auth;
pub mod clock;
pub mod email;
pub mod password_reset;
pub mod session;
pub mod token;
pub mod totp;
pub mod trusted_device;
pub mod two_factor;

pub use auth::AuthService;
pub use clock::Clock;
pub use email::EmailService;
pub use password_reset::PasswordResetService;
pub use session::{Claims, SessionService};
pub use token::{RequestMeta, TokenService};
pub use totp::TotpService;
pub use trusted_device::TrustedDeviceService;
pub use two_factor::TwoFactorService;
