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
use crate::entities::{courier, shipment, user};
use crate::errors::{map_write_err, ServiceError};
use crate::ids::{self, CodeKind, GENERATE_INSERT_ATTEMPTS};
use crate::validation;

const DROPDOWN_KEY: &str = "couriers";

/// Fields of a courier; shared by create and update.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CourierPayload {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Courier name must be between 1 and 100 characters"
    ))]
    pub name: String,
    #[validate(regex(
        path = "crate::validation::PHONE_RE",
        message = "Phone number must contain 6 to 20 digits"
    ))]
    pub phone: String,
}

/// Service for managing couriers.
#[derive(Clone)]
pub struct CourierService {
    db_pool: Arc<DbPool>,
    cache: Arc<LookupCache>,
}

impl CourierService {
    pub fn new(db_pool: Arc<DbPool>, cache: Arc<LookupCache>) -> Self {
        Self { db_pool, cache }
    }

    /// Creates a courier, minting a `KRR{2}` code when none is supplied.
    #[instrument(skip(self, payload), fields(actor = %actor.username))]
    pub async fn create_courier(
        &self,
        actor: &Actor,
        id: Option<String>,
        payload: CourierPayload,
    ) -> Result<courier::Model, ServiceError> {
        let db = &*self.db_pool;
        validation::validate_courier(db, &payload, None).await?;
        if let Some(code) = &id {
            if !validation::COURIER_CODE_RE.is_match(code) {
                return Err(ServiceError::ValidationError(vec![format!(
                    "Courier code {code} is malformed"
                )]));
            }
        }

        let explicit = id.is_some();
        for attempt in 1..=GENERATE_INSERT_ATTEMPTS {
            let code = match &id {
                Some(code) => code.clone(),
                None => ids::next_code(db, CodeKind::Courier).await?,
            };
            let now = Utc::now();
            let model = courier::ActiveModel {
                id: Set(code.clone()),
                name: Set(payload.name.clone()),
                phone: Set(payload.phone.clone()),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            };

            match model.insert(db).await.map_err(map_write_err) {
                Ok(created) => {
                    self.cache.invalidate(DROPDOWN_KEY);
                    info!(courier_id = %created.id, "courier created");
                    return Ok(created);
                }
                Err(ServiceError::Conflict(reason)) if !explicit => {
                    warn!(attempt, %code, %reason, "courier code conflict, regenerating");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::GenerationExhausted(format!(
            "could not place courier after {GENERATE_INSERT_ATTEMPTS} attempts"
        )))
    }

    /// Updates a courier through the same validation path as create.
    #[instrument(skip(self, payload), fields(actor = %actor.username, courier_id = %id))]
    pub async fn update_courier(
        &self,
        actor: &Actor,
        id: &str,
        payload: CourierPayload,
    ) -> Result<courier::Model, ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_courier(id).await?;
        validation::validate_courier(db, &payload, Some(id)).await?;

        let mut active: courier::ActiveModel = existing.into();
        active.name = Set(payload.name);
        active.phone = Set(payload.phone);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await.map_err(map_write_err)?;
        self.cache.invalidate(DROPDOWN_KEY);
        info!("courier updated");
        Ok(updated)
    }

    /// Deletes a courier unless a shipment or a user login still references
    /// them.
    #[instrument(skip(self), fields(actor = %actor.username, courier_id = %id))]
    pub async fn delete_courier(&self, actor: &Actor, id: &str) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_courier(id).await?;

        let shipment_refs = shipment::Entity::find()
            .filter(shipment::Column::CourierId.eq(id))
            .count(db)
            .await?;
        if shipment_refs > 0 {
            return Err(ServiceError::Conflict(format!(
                "Courier {id} is still referenced by {shipment_refs} shipment(s)"
            )));
        }

        let login_refs = user::Entity::find()
            .filter(user::Column::CourierId.eq(id))
            .count(db)
            .await?;
        if login_refs > 0 {
            return Err(ServiceError::Conflict(format!(
                "Courier {id} still has a system login"
            )));
        }

        courier::Entity::delete_by_id(existing.id).exec(db).await?;
        self.cache.invalidate(DROPDOWN_KEY);
        info!("courier deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_courier(&self, id: &str) -> Result<courier::Model, ServiceError> {
        let db = &*self.db_pool;
        courier::Entity::find_by_id(id.to_owned())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Courier {id} not found")))
    }

    #[instrument(skip(self))]
    pub async fn list_couriers(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<courier::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let paginator = courier::Entity::find()
            .order_by_asc(courier::Column::Id)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let couriers = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((couriers, total))
    }

    /// Cached id/name pairs for dropdown rendering.
    pub async fn dropdown(&self) -> Result<Vec<IdName>, ServiceError> {
        if let Some(rows) = self.cache.get(DROPDOWN_KEY) {
            return Ok(rows);
        }

        let db = &*self.db_pool;
        let rows: Vec<IdName> = courier::Entity::find()
            .order_by_asc(courier::Column::Id)
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
