pub mod device;
pub mod health;
pub mod login;
pub mod password;
pub mod profile;
pub mod register;
pub mod two_factor;

pub use device::{add_device, list_devices, remove_device};
pub use health::health_check;
pub use login::{login, verify_second_factor};
pub use password::{
    change_password, forgot_password, password_requirements, reset_password, verify_reset_token,
};
pub use profile::update_security_notifications;
pub use register::register;
pub use two_factor::{
    disable_2fa, enable_2fa, regenerate_backup_codes, setup_2fa, two_factor_status,
};
