use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::auth::Actor;
use crate::db::DbPool;
use crate::entities::{item, shipment_item};
use crate::errors::{map_write_err, ServiceError};
use crate::ids::{self, CodeKind, GENERATE_INSERT_ATTEMPTS};
use crate::validation;

/// Fields of an item; shared by create and update.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ItemPayload {
    #[validate(regex(
        path = "crate::validation::CATEGORY_CODE_RE",
        message = "Category code must match the KTG00 format"
    ))]
    pub category_id: String,
    #[validate(length(
        min = 1,
        max = 100,
        message = "Item name must be between 1 and 100 characters"
    ))]
    pub name: String,
    #[validate(length(min = 1, max = 20, message = "Unit must be between 1 and 20 characters"))]
    pub unit: String,
    pub price: Decimal,
    pub stock: i32,
    #[validate(length(max = 255, message = "Item description must be at most 255 characters"))]
    pub description: Option<String>,
}

/// Service for managing the item master.
#[derive(Clone)]
pub struct ItemService {
    db_pool: Arc<DbPool>,
}

impl ItemService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Creates an item, minting a `BRG{4}` code when none is supplied.
    #[instrument(skip(self, payload), fields(actor = %actor.username))]
    pub async fn create_item(
        &self,
        actor: &Actor,
        id: Option<String>,
        payload: ItemPayload,
    ) -> Result<item::Model, ServiceError> {
        let db = &*self.db_pool;
        validation::validate_item(db, &payload, None).await?;
        if let Some(code) = &id {
            if !validation::ITEM_CODE_RE.is_match(code) {
                return Err(ServiceError::ValidationError(vec![format!(
                    "Item code {code} is malformed"
                )]));
            }
        }

        let explicit = id.is_some();
        for attempt in 1..=GENERATE_INSERT_ATTEMPTS {
            let code = match &id {
                Some(code) => code.clone(),
                None => ids::next_code(db, CodeKind::Item).await?,
            };
            let now = Utc::now();
            let model = item::ActiveModel {
                id: Set(code.clone()),
                category_id: Set(payload.category_id.clone()),
                name: Set(payload.name.clone()),
                unit: Set(payload.unit.clone()),
                price: Set(payload.price),
                stock: Set(payload.stock),
                description: Set(payload.description.clone()),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            };

            match model.insert(db).await.map_err(map_write_err) {
                Ok(created) => {
                    info!(item_id = %created.id, "item created");
                    return Ok(created);
                }
                Err(ServiceError::Conflict(reason)) if !explicit => {
                    warn!(attempt, %code, %reason, "item code conflict, regenerating");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::GenerationExhausted(format!(
            "could not place item after {GENERATE_INSERT_ATTEMPTS} attempts"
        )))
    }

    /// Updates an item through the same validation path as create.
    #[instrument(skip(self, payload), fields(actor = %actor.username, item_id = %id))]
    pub async fn update_item(
        &self,
        actor: &Actor,
        id: &str,
        payload: ItemPayload,
    ) -> Result<item::Model, ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_item(id).await?;
        validation::validate_item(db, &payload, Some(id)).await?;

        let mut active: item::ActiveModel = existing.into();
        active.category_id = Set(payload.category_id);
        active.name = Set(payload.name);
        active.unit = Set(payload.unit);
        active.price = Set(payload.price);
        active.stock = Set(payload.stock);
        active.description = Set(payload.description);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await.map_err(map_write_err)?;
        info!("item updated");
        Ok(updated)
    }

    /// Deletes an item unless a shipment line still references it.
    #[instrument(skip(self), fields(actor = %actor.username, item_id = %id))]
    pub async fn delete_item(&self, actor: &Actor, id: &str) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_item(id).await?;

        let references = shipment_item::Entity::find()
            .filter(shipment_item::Column::ItemId.eq(id))
            .count(db)
            .await?;
        if references > 0 {
            return Err(ServiceError::Conflict(format!(
                "Item {id} is still referenced by {references} shipment line(s)"
            )));
        }

        item::Entity::delete_by_id(existing.id).exec(db).await?;
        info!("item deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, id: &str) -> Result<item::Model, ServiceError> {
        let db = &*self.db_pool;
        item::Entity::find_by_id(id.to_owned())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {id} not found")))
    }

    /// Lists items with pagination and an optional category filter.
    #[instrument(skip(self))]
    pub async fn list_items(
        &self,
        page: u64,
        per_page: u64,
        category_id: Option<&str>,
    ) -> Result<(Vec<item::Model>, u64), ServiceError> {
        let db = &*self.db_pool;

        let mut query = item::Entity::find();
        if let Some(category_id) = category_id {
            query = query.filter(item::Column::CategoryId.eq(category_id));
        }

        let paginator = query.order_by_asc(item::Column::Id).paginate(db, per_page);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }
}
