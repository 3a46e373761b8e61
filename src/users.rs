use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::storage::{ChangeBus, DurableStorage, Reconcile, SyncedCollection, USERS_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }

    /// Where a user with this role lands after login or a refused route.
    pub fn home_path(&self) -> &'static str {
        match self {
            Role::Buyer => "/home",
            Role::Seller => "/seller",
            Role::Admin => "/admin-portal/dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Role::Buyer),
            "seller" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::BadRequest(format!("Unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Registration input. The password is plaintext here and never stored.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// Emails are the directory key; compare them trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Registered users, persisted under the `users` key.
pub struct UserDirectory {
    users: SyncedCollection<User>,
    bcrypt_cost: u32,
    /// Checked against when the email is unknown so both failure paths cost the same.
    dummy_hash: String,
}

impl UserDirectory {
    pub fn open(
        storage: Arc<dyn DurableStorage>,
        bus: ChangeBus,
        bcrypt_cost: u32,
    ) -> AppResult<Self> {
        let users = SyncedCollection::open(USERS_KEY, storage, bus)?;
        let dummy_hash = bcrypt::hash("not-a-real-password", bcrypt_cost)?;
        Ok(Self {
            users,
            bcrypt_cost,
            dummy_hash,
        })
    }

    /// Insert or overwrite by email. An existing user keeps their id.
    pub fn save_user(&self, new_user: NewUser) -> AppResult<User> {
        let email = normalize_email(&new_user.email);
        let password_hash = bcrypt::hash(&new_user.password, self.bcrypt_cost)?;

        let user = self.users.mutate(|users| {
            let user = match users.iter_mut().find(|u| u.email == email) {
                Some(existing) => {
                    existing.name = new_user.name.clone();
                    existing.password_hash = password_hash;
                    existing.role = new_user.role;
                    existing.clone()
                }
                None => {
                    let user = User {
                        id: uuid::Uuid::now_v7().to_string(),
                        name: new_user.name.clone(),
                        email: email.clone(),
                        password_hash,
                        role: new_user.role,
                        created_at: Utc::now(),
                    };
                    users.push(user.clone());
                    user
                }
            };
            Ok(user)
        })?;

        tracing::info!("Saved user {} ({})", user.id, user.role);
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = normalize_email(email);
        self.users
            .with_items(|users| users.iter().find(|u| u.email == email).cloned())
    }

    /// Returns the user only when the email exists and the password matches.
    /// Callers must not tell the two failure cases apart.
    pub fn verify_user(&self, email: &str, password: &str) -> AppResult<Option<User>> {
        match self.get_user_by_email(email)? {
            Some(user) => {
                if bcrypt::verify(password, &user.password_hash)? {
                    Ok(Some(user))
                } else {
                    Ok(None)
                }
            }
            None => {
                bcrypt::verify(password, &self.dummy_hash)?;
                Ok(None)
            }
        }
    }

    /// Buyers and sellers, as counted on the admin dashboard.
    pub fn active_user_count(&self) -> AppResult<usize> {
        self.users
            .with_items(|users| users.iter().filter(|u| u.role != Role::Admin).count())
    }

    pub fn reload(&self) -> AppResult<()> {
        self.users.reload()
    }
}

impl Reconcile for UserDirectory {
    fn key(&self) -> &'static str {
        self.users.key()
    }

    fn reconcile(&self) -> AppResult<bool> {
        self.users.reconcile()
    }
}
