use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::auth::Actor;
use crate::cache::{IdName, LookupCache};
use crate::db::DbPool;
use crate::entities::{category, item};
use crate::errors::{map_write_err, ServiceError};
use crate::ids::{self, CodeKind, GENERATE_INSERT_ATTEMPTS};
use crate::validation;

const DROPDOWN_KEY: &str = "categories";

/// Fields of a category; shared by create and update.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CategoryPayload {
    #[validate(length(
        min = 1,
        max = 50,
        message = "Category name must be between 1 and 50 characters"
    ))]
    pub name: String,
    #[validate(length(max = 255, message = "Category description must be at most 255 characters"))]
    pub description: Option<String>,
}

/// Service for managing item categories.
#[derive(Clone)]
pub struct CategoryService {
    db_pool: Arc<DbPool>,
    cache: Arc<LookupCache>,
}

impl CategoryService {
    pub fn new(db_pool: Arc<DbPool>, cache: Arc<LookupCache>) -> Self {
        Self { db_pool, cache }
    }

    /// Creates a category, minting a `KTG{2}` code when none is supplied.
    #[instrument(skip(self, payload), fields(actor = %actor.username))]
    pub async fn create_category(
        &self,
        actor: &Actor,
        id: Option<String>,
        payload: CategoryPayload,
    ) -> Result<category::Model, ServiceError> {
        let db = &*self.db_pool;
        validation::validate_category(db, &payload, None).await?;
        if let Some(code) = &id {
            if !validation::CATEGORY_CODE_RE.is_match(code) {
                return Err(ServiceError::ValidationError(vec![format!(
                    "Category code {code} is malformed"
                )]));
            }
        }

        let explicit = id.is_some();
        for attempt in 1..=GENERATE_INSERT_ATTEMPTS {
            let code = match &id {
                Some(code) => code.clone(),
                None => ids::next_code(db, CodeKind::Category).await?,
            };
            let now = Utc::now();
            let model = category::ActiveModel {
                id: Set(code.clone()),
                name: Set(payload.name.clone()),
                description: Set(payload.description.clone()),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            };

            match model.insert(db).await.map_err(map_write_err) {
                Ok(created) => {
                    self.cache.invalidate(DROPDOWN_KEY);
                    info!(category_id = %created.id, "category created");
                    return Ok(created);
                }
                Err(ServiceError::Conflict(reason)) if !explicit => {
                    warn!(attempt, %code, %reason, "category code conflict, regenerating");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::GenerationExhausted(format!(
            "could not place category after {GENERATE_INSERT_ATTEMPTS} attempts"
        )))
    }

    /// Updates a category through the same validation path as create.
    #[instrument(skip(self, payload), fields(actor = %actor.username, category_id = %id))]
    pub async fn update_category(
        &self,
        actor: &Actor,
        id: &str,
        payload: CategoryPayload,
    ) -> Result<category::Model, ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_category(id).await?;
        validation::validate_category(db, &payload, Some(id)).await?;

        let mut active: category::ActiveModel = existing.into();
        active.name = Set(payload.name);
        active.description = Set(payload.description);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await.map_err(map_write_err)?;
        self.cache.invalidate(DROPDOWN_KEY);
        info!("category updated");
        Ok(updated)
    }

    /// Deletes a category unless an item still references it.
    #[instrument(skip(self), fields(actor = %actor.username, category_id = %id))]
    pub async fn delete_category(&self, actor: &Actor, id: &str) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_category(id).await?;

        let references = item::Entity::find()
            .filter(item::Column::CategoryId.eq(id))
            .count(db)
            .await?;
        if references > 0 {
            return Err(ServiceError::Conflict(format!(
                "Category {id} is still referenced by {references} item(s)"
            )));
        }

        category::Entity::delete_by_id(existing.id).exec(db).await?;
        self.cache.invalidate(DROPDOWN_KEY);
        info!("category deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_category(&self, id: &str) -> Result<category::Model, ServiceError> {
        let db = &*self.db_pool;
        category::Entity::find_by_id(id.to_owned())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {id} not found")))
    }

    #[instrument(skip(self))]
    pub async fn list_categories(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<category::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let paginator = category::Entity::find()
            .order_by_asc(category::Column::Id)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let categories = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((categories, total))
    }

    /// Cached id/name pairs for dropdown rendering. Best-effort consistency:
    /// writes invalidate, reads repopulate.
    pub async fn dropdown(&self) -> Result<Vec<IdName>, ServiceError> {
        if let Some(rows) = self.cache.get(DROPDOWN_KEY) {
            return Ok(rows);
        }

        let db = &*self.db_pool;
        let rows: Vec<IdName> = category::Entity::find()
            .order_by_asc(category::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .map(|m| IdName {
                id: m.id,
                name: m.name,
            })
            .collect();

        self.cache.put(DROPDOWN_KEY, rows.clone());
        Ok(rows)
    }
}
