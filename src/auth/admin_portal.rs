use crate::auth::session::Session;
use crate::config::AdminConfig;
use crate::error::{AppError, AppResult};
use crate::users::{normalize_email, Role, UserDirectory};
use crate::validation::FieldErrors;

/// Display name used for portal sessions.
pub const ADMIN_NAME: &str = "Administrator";

/// Check the portal's static access key and email allow-list.
///
/// On success returns the admin identity to open a session for. If the
/// email also belongs to a directory user, that user's id is reused.
pub fn authenticate(
    config: &AdminConfig,
    users: &UserDirectory,
    email: &str,
    access_key: &str,
) -> AppResult<Session> {
    let mut errors = FieldErrors::default();
    errors.require("email", email, "Email is required");
    errors.require("accessKey", access_key, "Access key is required");
    errors.into_result()?;

    let Some(expected) = config.access_key.as_deref() else {
        tracing::warn!("Admin portal login attempted but no access key is configured");
        return Err(AppError::Forbidden("Admin portal is not configured".into()));
    };

    if !constant_time_eq(access_key.as_bytes(), expected.as_bytes()) {
        tracing::warn!("Admin portal login with wrong access key");
        let mut errors = FieldErrors::default();
        errors.add("accessKey", "Invalid access key. Admin access is restricted.");
        return Err(AppError::Validation(errors));
    }

    let email = normalize_email(email);
    let allowed = config
        .allowed_emails
        .iter()
        .any(|allowed| normalize_email(allowed) == email);
    if !allowed {
        tracing::warn!("Admin portal login for non-allow-listed email {}", email);
        let mut errors = FieldErrors::default();
        errors.add("email", "This email is not authorized for admin access.");
        return Err(AppError::Validation(errors));
    }

    let user_id = users
        .get_user_by_email(&email)?
        .map(|user| user.id)
        .unwrap_or_else(|| format!("admin:{}", email));

    Ok(Session {
        user_id,
        name: ADMIN_NAME.to_string(),
        email,
        role: Role::Admin,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len_match = a.len() == b.len();
    let max_len = a.len().max(b.len());

    let mut result = 0u8;
    for i in 0..max_len {
        let byte_a = a.get(i).copied().unwrap_or(0);
        let byte_b = b.get(i).copied().unwrap_or(0);
        result |= byte_a ^ byte_b;
    }

    len_match && result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChangeBus, MemoryStorage};
    use crate::users::NewUser;
    use std::sync::Arc;

    fn config() -> AdminConfig {
        AdminConfig {
            access_key: Some("open-sesame".to_string()),
            allowed_emails: vec!["Admin@DeanHomes.com".to_string()],
        }
    }

    fn users() -> UserDirectory {
        UserDirectory::open(Arc::new(MemoryStorage::new()), ChangeBus::new(), 4).unwrap()
    }

    fn field_error(result: AppResult<Session>, field: &str) -> String {
        match result {
            Err(AppError::Validation(errors)) => errors
                .get(field)
                .unwrap_or_else(|| panic!("no error for {}", field))
                .to_string(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn valid_key_and_email_yield_admin_session() {
        let session =
            authenticate(&config(), &users(), "admin@deanhomes.com", "open-sesame").unwrap();
        assert_eq!(session.role, Role::Admin);
        assert_eq!(session.name, ADMIN_NAME);
        assert_eq!(session.user_id, "admin:admin@deanhomes.com");
    }

    #[test]
    fn directory_user_id_is_reused() {
        let users = users();
        let user = users
            .save_user(NewUser {
                name: "Dean".to_string(),
                email: "admin@deanhomes.com".to_string(),
                password: "secret1".to_string(),
                role: Role::Admin,
            })
            .unwrap();
        let session =
            authenticate(&config(), &users, "ADMIN@deanhomes.com", "open-sesame").unwrap();
        assert_eq!(session.user_id, user.id);
    }

    #[test]
    fn blank_fields_are_required() {
        let result = authenticate(&config(), &users(), " ", "");
        assert_eq!(field_error(result, "accessKey"), "Access key is required");
    }

    #[test]
    fn wrong_key_has_specific_message() {
        let result = authenticate(&config(), &users(), "admin@deanhomes.com", "guess");
        assert_eq!(
            field_error(result, "accessKey"),
            "Invalid access key. Admin access is restricted."
        );
    }

    #[test]
    fn unlisted_email_is_refused() {
        let result = authenticate(&config(), &users(), "intruder@example.com", "open-sesame");
        assert_eq!(
            field_error(result, "email"),
            "This email is not authorized for admin access."
        );
    }

    #[test]
    fn unconfigured_portal_refuses_everyone() {
        let config = AdminConfig {
            access_key: None,
            ..config()
        };
        let result = authenticate(&config, &users(), "admin@deanhomes.com", "anything");
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn constant_time_eq_compares_lengths() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"abc", b"abd"));
    }
}
