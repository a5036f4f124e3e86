pub mod config;
pub mod subscription;

pub use config::{Config, ConfigError, RoleButton, RoleSet};
pub use subscription::{GraceUser, Subscriber, days_remaining};
