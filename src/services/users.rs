use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{self, Actor};
use crate::db::DbPool;
use crate::entities::user::{self, Role};
use crate::errors::{map_write_err, ServiceError};
use crate::validation;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(
        min = 3,
        max = 30,
        message = "Username must be between 3 and 30 characters"
    ))]
    pub username: String,
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: Role,
    /// 1:1 courier link for courier logins.
    #[validate(regex(
        path = "crate::validation::COURIER_CODE_RE",
        message = "Courier code must match the KRR00 format"
    ))]
    pub courier_id: Option<String>,
}

/// Partial update; omitted fields are left untouched. The username is
/// immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: Option<String>,
    pub role: Option<Role>,
    #[validate(regex(
        path = "crate::validation::COURIER_CODE_RE",
        message = "Courier code must match the KRR00 format"
    ))]
    pub courier_id: Option<String>,
    pub active: Option<bool>,
}

/// Service for managing authentication principals.
#[derive(Clone)]
pub struct UserService {
    db_pool: Arc<DbPool>,
}

impl UserService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Creates a user. The password is stored only as a salted argon2 hash.
    #[instrument(skip(self, request), fields(actor = %actor.username, username = %request.username))]
    pub async fn create_user(
        &self,
        actor: &Actor,
        request: CreateUserRequest,
    ) -> Result<user::Model, ServiceError> {
        let db = &*self.db_pool;
        validation::validate_new_user(db, &request).await?;

        let password_hash = auth::hash_password(&request.password)?;
        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(request.username.clone()),
            name: Set(request.name),
            password_hash: Set(password_hash),
            role: Set(request.role),
            courier_id: Set(request.courier_id),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let created = model.insert(db).await.map_err(map_write_err)?;
        info!(user_id = %created.id, "user created");
        Ok(created)
    }

    /// Applies a partial update; a supplied password is re-hashed.
    #[instrument(skip(self, request), fields(actor = %actor.username, user_id = %id))]
    pub async fn update_user(
        &self,
        actor: &Actor,
        id: Uuid,
        request: UpdateUserRequest,
    ) -> Result<user::Model, ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_user(id).await?;

        let mut violations = validation::Violations::default();
        violations.absorb(request.validate());
        if let Some(courier_id) = &request.courier_id {
            if !validation::courier_exists(db, courier_id).await? {
                violations.push(format!("Courier {courier_id} does not exist"));
            } else if validation::courier_already_linked(db, courier_id, Some(id)).await? {
                violations.push(format!("Courier {courier_id} already has a login"));
            }
        }
        violations.into_result()?;

        let mut active: user::ActiveModel = existing.into();
        if let Some(name) = request.name {
            active.name = Set(name);
        }
        if let Some(password) = request.password {
            active.password_hash = Set(auth::hash_password(&password)?);
        }
        if let Some(role) = request.role {
            active.role = Set(role);
        }
        if let Some(courier_id) = request.courier_id {
            active.courier_id = Set(Some(courier_id));
        }
        if let Some(is_active) = request.active {
            active.active = Set(is_active);
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await.map_err(map_write_err)?;
        info!("user updated");
        Ok(updated)
    }

    /// Checks a username/password pair, returning the user on success.
    /// Inactive users and unknown usernames fail identically.
    #[instrument(skip(self, password))]
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<user::Model, ServiceError> {
        let db = &*self.db_pool;
        let user = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(db)
            .await?;

        let Some(user) = user else {
            return Err(ServiceError::AuthError("invalid credentials".to_string()));
        };
        if !user.active {
            warn!(username, "login attempt for inactive user");
            return Err(ServiceError::AuthError("invalid credentials".to_string()));
        }
        if !auth::verify_password(password, &user.password_hash)? {
            return Err(ServiceError::AuthError("invalid credentials".to_string()));
        }

        Ok(user)
    }

    /// Removes a user account.
    #[instrument(skip(self), fields(actor = %actor.username, user_id = %id))]
    pub async fn delete_user(&self, actor: &Actor, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_user(id).await?;
        user::Entity::delete_by_id(existing.id).exec(db).await?;
        info!("user deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: Uuid) -> Result<user::Model, ServiceError> {
        let db = &*self.db_pool;
        user::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {id} not found")))
    }

    #[instrument(skip(self))]
    pub async fn list_users(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<user::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let paginator = user::Entity::find()
            .order_by_asc(user::Column::Username)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let users = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((users, total))
    }
}
