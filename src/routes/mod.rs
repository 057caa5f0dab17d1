mod auth;
mod health_check;

pub use auth::{
    delete_account, json_config, logout_all, refresh, revoke, revoke_path, status, whoami,
    LogoutAllResponse, RefreshRequest, RevokeRequest, StatusResponse, WhoAmIResponse,
};
pub use health_check::health_check;
