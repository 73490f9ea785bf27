//! HTTP adapter for the session commands.

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use routes::{USER_ID_HEADER, UserId, create_router};
pub use server::{ApiServer, ApiServerConfig, AppState};
