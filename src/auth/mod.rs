mod helpers;
mod middleware;
mod token;

pub use middleware::{OptionalAuth, RequireAdmin, RequireTenant, TENANT_HEADER};
pub use token::{TokenGenerator, parse_token};
