use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Message, User};

// -- JWT Claims --

/// Access token claims. `sub` carries the username, which is what the
/// identity resolver looks up on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

// -- Auth --

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 50))]
    pub user_name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// OAuth2 password-flow form body (`application/x-www-form-urlencoded`).
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub username: String,
    #[serde(rename = "ID")]
    pub id: i64,
    pub token_type: String,
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub user_name: String,
    pub email: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            user_name: user.user_name,
            email: user.email,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    pub username: String,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            user_name: user.user_name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: i64,
    pub text: String,
    pub links: Vec<String>,
    pub sender: UserSummary,
    pub receiver: UserSummary,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            sender: UserSummary::from(&msg.sender),
            receiver: UserSummary::from(&msg.receiver),
            text: msg.text,
            links: msg.links,
            created_at: msg.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteMessageRequest {
    pub id: i64,
}

// -- Files --

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadUrlResponse {
    pub download_url: String,
    pub expires_in: u64,
}

/// Query string of a presigned download URL.
#[derive(Debug, Deserialize)]
pub struct PresignedQuery {
    pub expires: i64,
    pub signature: String,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_uses_uppercase_id_key() {
        let resp = LoginResponse {
            access_token: "t".into(),
            username: "alice".into(),
            id: 7,
            token_type: "bearer".into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ID"], 7);
        assert!(json.get("id").is_none());
    }

    #[test]
    fn register_request_rejects_unknown_fields() {
        let raw = r#"{"user_name":"a","email":"a@x.com","password":"p","admin":true}"#;
        assert!(serde_json::from_str::<RegisterRequest>(raw).is_err());
    }
}
