use tracing::debug;

use courier_db::Database;
use courier_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::token::TokenService;

/// Map a bearer token to the user it was issued for.
///
/// A bad token and a token whose user no longer exists both come back as
/// `Unauthorized`; callers cannot tell them apart. Performs one store lookup.
pub fn resolve(db: &Database, tokens: &TokenService, token: &str) -> ApiResult<User> {
    let subject = tokens.verify(token).map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        ApiError::Unauthorized
    })?;

    db.get_user_by_username(&subject)?
        .map(User::from)
        .ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> (Database, TokenService) {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", "a@x.com", "hash").unwrap().unwrap();
        (db, TokenService::new(b"identity-secret"))
    }

    #[test]
    fn valid_token_resolves_to_user() {
        let (db, tokens) = setup();
        let token = tokens.issue("alice", Duration::hours(1)).unwrap();

        let user = resolve(&db, &tokens, &token).unwrap();
        assert_eq!(user.user_name, "alice");
        assert_eq!(user.email, "a@x.com");
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let (db, tokens) = setup();
        let token = tokens.issue("alice", Duration::seconds(-5)).unwrap();
        assert!(matches!(resolve(&db, &tokens, &token), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn token_for_deleted_user_is_unauthorized() {
        let (db, tokens) = setup();
        let token = tokens.issue("alice", Duration::hours(1)).unwrap();
        let alice = db.get_user_by_username("alice").unwrap().unwrap();
        db.delete_user(alice.id).unwrap();

        assert!(matches!(resolve(&db, &tokens, &token), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn token_for_unknown_subject_is_unauthorized() {
        let (db, tokens) = setup();
        let token = tokens.issue("ghost", Duration::hours(1)).unwrap();
        assert!(matches!(resolve(&db, &tokens, &token), Err(ApiError::Unauthorized)));
    }
}
