pub mod retry;
pub use retry::{RetryOutcome, RetryPolicy, Sleeper, TokioSleeper};

pub mod upload_service;
pub mod upload_service_impl;
pub use upload_service::{UploadAction, UploadError, UploadOutcome, UploadService};
pub use upload_service_impl::DiskUploadService;

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthError, AuthService, IssuedApiKey, UserInfo};
pub use auth_service_impl::SeaOrmAuthService;
