pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;

pub const APP_NAME: &str = "vidgate";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
