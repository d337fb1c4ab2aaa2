pub mod auth;
pub mod responses;
pub mod router;
pub mod state;

pub use responses::{ApiError, ApiMessage, json_error};
pub use state::AppState;
