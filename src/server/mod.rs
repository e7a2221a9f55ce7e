mod admin;
pub mod dto;
mod projects;
mod public;
pub mod response;
mod router;
mod uploads;

pub use router::{AppState, create_router};
