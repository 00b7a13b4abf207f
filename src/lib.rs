//! Client-side payment logic for the school fee portal: exam selection,
//! server-side fee aggregation, checkout submission and post-checkout
//! verification against the portal's REST backend.

pub mod auth;
pub mod backend;
pub mod cache;
pub mod config;
pub mod logging;
pub mod payments;
pub mod services;

pub use auth::AuthContext;
pub use backend::error::{ApiError, ApiResult};
pub use backend::{BackendConfig, HttpBackend, PortalBackend};
pub use payments::error::{PaymentError, PaymentResult, RecoveryAction};
