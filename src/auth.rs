//! Acting-user context and password hashing.
//!
//! Services take an explicit [`Actor`] instead of reading ambient session
//! state; the embedding layer builds one from its authenticated principal.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};

use crate::entities::user::{self, Role};
use crate::errors::ServiceError;

/// The authenticated principal on whose behalf a service operation runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: Role,
    /// Present when the principal is a courier login (1:1 courier link).
    pub courier_id: Option<String>,
}

impl Actor {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
            courier_id: None,
        }
    }

    pub fn courier(username: impl Into<String>, courier_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: Role::Warehouse,
            courier_id: Some(courier_id.into()),
        }
    }

    pub fn from_user(user: &user::Model) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
            courier_id: user.courier_id.clone(),
        }
    }

    /// Courier-acting principals are the only ones that populate the
    /// shipment recipient via the status-only update path.
    pub fn is_courier(&self) -> bool {
        self.courier_id.is_some()
    }
}

/// Hashes a password into a salted argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::HashError(e.to_string()))
}

/// Verifies a password against a stored PHC hash.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, ServiceError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| ServiceError::HashError(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trips_and_salts() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());

        // Two hashes of the same password differ by salt.
        let other = hash_password("correct horse battery").unwrap();
        assert_ne!(hash, other);
    }

    #[test]
    fn courier_actor_is_detected_by_link() {
        let courier = Actor::courier("budi", "KRR01");
        assert!(courier.is_courier());

        let admin = Actor::new("admin", Role::Admin);
        assert!(!admin.is_courier());
    }
}
