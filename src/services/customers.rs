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
use crate::entities::{customer, shipment};
use crate::errors::{map_write_err, ServiceError};
use crate::ids::{self, CodeKind, GENERATE_INSERT_ATTEMPTS};
use crate::validation;

const DROPDOWN_KEY: &str = "customers";

/// Fields of a customer; shared by create and update.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerPayload {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Customer name must be between 1 and 100 characters"
    ))]
    pub name: String,
    #[validate(regex(
        path = "crate::validation::PHONE_RE",
        message = "Phone number must contain 6 to 20 digits"
    ))]
    pub phone: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Address must be between 1 and 255 characters"
    ))]
    pub address: String,
}

/// Service for managing customers.
#[derive(Clone)]
pub struct CustomerService {
    db_pool: Arc<DbPool>,
    cache: Arc<LookupCache>,
}

impl CustomerService {
    pub fn new(db_pool: Arc<DbPool>, cache: Arc<LookupCache>) -> Self {
        Self { db_pool, cache }
    }

    /// Creates a customer, minting a `CST{4}` code when none is supplied.
    #[instrument(skip(self, payload), fields(actor = %actor.username))]
    pub async fn create_customer(
        &self,
        actor: &Actor,
        id: Option<String>,
        payload: CustomerPayload,
    ) -> Result<customer::Model, ServiceError> {
        let db = &*self.db_pool;
        validation::validate_customer(db, &payload, None).await?;
        if let Some(code) = &id {
            if !validation::CUSTOMER_CODE_RE.is_match(code) {
                return Err(ServiceError::ValidationError(vec![format!(
                    "Customer code {code} is malformed"
                )]));
            }
        }

        let explicit = id.is_some();
        for attempt in 1..=GENERATE_INSERT_ATTEMPTS {
            let code = match &id {
                Some(code) => code.clone(),
                None => ids::next_code(db, CodeKind::Customer).await?,
            };
            let now = Utc::now();
            let model = customer::ActiveModel {
                id: Set(code.clone()),
                name: Set(payload.name.clone()),
                phone: Set(payload.phone.clone()),
                address: Set(payload.address.clone()),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            };

            match model.insert(db).await.map_err(map_write_err) {
                Ok(created) => {
                    self.cache.invalidate(DROPDOWN_KEY);
                    info!(customer_id = %created.id, "customer created");
                    return Ok(created);
                }
                Err(ServiceError::Conflict(reason)) if !explicit => {
                    warn!(attempt, %code, %reason, "customer code conflict, regenerating");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::GenerationExhausted(format!(
            "could not place customer after {GENERATE_INSERT_ATTEMPTS} attempts"
        )))
    }

    /// Updates a customer through the same validation path as create.
    #[instrument(skip(self, payload), fields(actor = %actor.username, customer_id = %id))]
    pub async fn update_customer(
        &self,
        actor: &Actor,
        id: &str,
        payload: CustomerPayload,
    ) -> Result<customer::Model, ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_customer(id).await?;
        validation::validate_customer(db, &payload, Some(id)).await?;

        let mut active: customer::ActiveModel = existing.into();
        active.name = Set(payload.name);
        active.phone = Set(payload.phone);
        active.address = Set(payload.address);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await.map_err(map_write_err)?;
        self.cache.invalidate(DROPDOWN_KEY);
        info!("customer updated");
        Ok(updated)
    }

    /// Deletes a customer unless a shipment still references them.
    #[instrument(skip(self), fields(actor = %actor.username, customer_id = %id))]
    pub async fn delete_customer(&self, actor: &Actor, id: &str) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_customer(id).await?;

        let references = shipment::Entity::find()
            .filter(shipment::Column::CustomerId.eq(id))
            .count(db)
            .await?;
        if references > 0 {
            return Err(ServiceError::Conflict(format!(
                "Customer {id} is still referenced by {references} shipment(s)"
            )));
        }

        customer::Entity::delete_by_id(existing.id).exec(db).await?;
        self.cache.invalidate(DROPDOWN_KEY);
        info!("customer deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_customer(&self, id: &str) -> Result<customer::Model, ServiceError> {
        let db = &*self.db_pool;
        customer::Entity::find_by_id(id.to_owned())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {id} not found")))
    }

    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<customer::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let paginator = customer::Entity::find()
            .order_by_asc(customer::Column::Id)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let customers = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((customers, total))
    }

    /// Cached id/name pairs for dropdown rendering.
    pub async fn dropdown(&self) -> Result<Vec<IdName>, ServiceError> {
        if let Some(rows) = self.cache.get(DROPDOWN_KEY) {
            return Ok(rows);
        }

        let db = &*self.db_pool;
        let rows: Vec<IdName> = customer::Entity::find()
            .order_by_asc(customer::Column::Id)
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
