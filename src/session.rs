use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::profile::Role;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The acting user. Authentication happens upstream; every operation takes
/// the session explicitly instead of reading ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
}

impl Session {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn require(&self, role: Role, action: &str) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} users cannot {action}",
                self.role.as_str()
            )))
        }
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|err| AppError::Unauthorized(format!("invalid {USER_ID_HEADER}: {err}")))?;
        let role = header(parts, USER_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(AppError::Unauthorized)?;

        Ok(Session { user_id, role })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|err| AppError::Unauthorized(format!("invalid {name}: {err}")))
}
