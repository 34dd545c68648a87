pub mod auth;
pub mod conversations;
pub mod error;
pub mod files;
pub mod identity;
pub mod messages;
pub mod middleware;
pub mod password;
pub mod router;
pub mod state;
pub mod token;
pub mod users;

pub use error::{ApiError, ApiResult};
pub use router::router;
pub use state::{AppState, AppStateInner};
