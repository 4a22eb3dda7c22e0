//! Shipment lifecycle: transactional creation/update of a header plus its
//! line-item set, status transitions, and deletion.
//!
//! Identifier and PO-number generation are advisory; uniqueness is enforced
//! by the storage constraints at insert time. `create_shipment` therefore
//! wraps generation + insert in a bounded retry loop and regenerates on
//! `Conflict`. All header+items writes share one transaction begun and
//! committed here and nowhere else.

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::auth::Actor;
use crate::db::DbPool;
use crate::entities::shipment::{self, ShipmentStatus};
use crate::entities::shipment_item;
use crate::errors::{map_write_err, ServiceError};
use crate::ids::{self, GENERATE_INSERT_ATTEMPTS};
use crate::services::line_items::{LineItemInput, LineItemStore};
use crate::validation;

/// Commercial fields of a shipment. Shared by create and full update; the
/// identifier itself is immutable and never part of the header.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShipmentHeader {
    pub shipment_date: NaiveDate,
    #[validate(regex(
        path = "crate::validation::CUSTOMER_CODE_RE",
        message = "Customer code must match the CST0000 format"
    ))]
    pub customer_id: String,
    #[validate(regex(
        path = "crate::validation::COURIER_CODE_RE",
        message = "Courier code must match the KRR00 format"
    ))]
    pub courier_id: String,
    #[validate(length(
        min = 1,
        max = 15,
        message = "Vehicle plate must be between 1 and 15 characters"
    ))]
    pub vehicle_plate: String,
    /// `None` on create defaults to Pending; `None` on update leaves the
    /// stored status unchanged.
    pub status: Option<ShipmentStatus>,
    pub note: Option<String>,
    pub geo_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateShipmentRequest {
    /// Caller-supplied identifier. When absent one is minted; a supplied
    /// identifier is used as-is and never retried on conflict.
    pub id: Option<String>,
    pub po_number: Option<String>,
    #[validate]
    pub header: ShipmentHeader,
    pub items: Vec<LineItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateShipmentRequest {
    #[validate]
    pub header: ShipmentHeader,
    /// Non-empty: the full line-item set is replaced. Empty: existing items
    /// are left untouched. The two cases are deliberately distinct.
    pub items: Vec<LineItemInput>,
}

/// The narrow, single-field-focused path used by restricted-role actors.
/// Note that commercial fields are absent by construction — this struct is
/// the only way to populate `recipient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: ShipmentStatus,
    pub note: Option<String>,
    pub recipient: Option<String>,
    pub geo_note: Option<String>,
}

/// A shipment header together with its materialized line items.
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentDetails {
    pub shipment: shipment::Model,
    pub items: Vec<shipment_item::Model>,
}

/// Service orchestrating the shipment lifecycle.
#[derive(Clone)]
pub struct ShipmentService {
    db_pool: Arc<DbPool>,
}

impl ShipmentService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Creates a shipment together with its line items, all-or-nothing.
    #[instrument(skip(self, request), fields(actor = %actor.username, date = %request.header.shipment_date))]
    pub async fn create_shipment(
        &self,
        actor: &Actor,
        request: CreateShipmentRequest,
    ) -> Result<ShipmentDetails, ServiceError> {
        let db = &*self.db_pool;
        validation::validate_shipment_create(db, &request).await?;

        let explicit_id = request.id.is_some();
        for attempt in 1..=GENERATE_INSERT_ATTEMPTS {
            let id = match &request.id {
                Some(id) => id.clone(),
                None => ids::next_shipment_code(db, request.header.shipment_date).await?,
            };
            let po_number = match &request.po_number {
                Some(po) => po.clone(),
                None => ids::next_po_number(db).await?,
            };

            match self.insert_shipment(&id, &po_number, &request).await {
                Ok(details) => {
                    info!(
                        shipment_id = %details.shipment.id,
                        po_number = %details.shipment.po_number,
                        item_count = details.items.len(),
                        "shipment created"
                    );
                    return Ok(details);
                }
                Err(ServiceError::Conflict(reason)) if !explicit_id => {
                    warn!(attempt, %id, %reason, "identifier conflict on insert, regenerating");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::GenerationExhausted(format!(
            "could not place shipment after {GENERATE_INSERT_ATTEMPTS} attempts"
        )))
    }

    async fn insert_shipment(
        &self,
        id: &str,
        po_number: &str,
        request: &CreateShipmentRequest,
    ) -> Result<ShipmentDetails, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start transaction for shipment creation");
            ServiceError::TransactionFailure(e.to_string())
        })?;

        let header = shipment::ActiveModel {
            id: Set(id.to_owned()),
            shipment_date: Set(request.header.shipment_date),
            customer_id: Set(request.header.customer_id.clone()),
            courier_id: Set(request.header.courier_id.clone()),
            vehicle_plate: Set(request.header.vehicle_plate.clone()),
            po_number: Set(po_number.to_owned()),
            status: Set(request.header.status.unwrap_or(ShipmentStatus::Pending)),
            note: Set(request.header.note.clone()),
            recipient: Set(None),
            geo_note: Set(request.header.geo_note.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let inserted = match header.insert(&txn).await {
            Ok(model) => model,
            Err(err) => {
                let _ = txn.rollback().await;
                return Err(map_write_err(err));
            }
        };

        if let Err(err) = LineItemStore::replace_all(&txn, id, &request.items).await {
            let _ = txn.rollback().await;
            return Err(err);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, shipment_id = %id, "failed to commit shipment creation");
            ServiceError::TransactionFailure(e.to_string())
        })?;

        let items = LineItemStore::get_by_shipment(db, id).await?;
        Ok(ShipmentDetails {
            shipment: inserted,
            items,
        })
    }

    /// Updates the header and, when `items` is non-empty, replaces the full
    /// line-item set in the same transaction. The identifier is immutable.
    #[instrument(skip(self, request), fields(actor = %actor.username, shipment_id = %id))]
    pub async fn update_shipment(
        &self,
        actor: &Actor,
        id: &str,
        request: UpdateShipmentRequest,
    ) -> Result<ShipmentDetails, ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_shipment(id).await?;
        validation::validate_shipment_update(db, &request, &existing).await?;

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, shipment_id = %id, "failed to start transaction for shipment update");
            ServiceError::TransactionFailure(e.to_string())
        })?;

        let mut active: shipment::ActiveModel = existing.into();
        active.shipment_date = Set(request.header.shipment_date);
        active.customer_id = Set(request.header.customer_id.clone());
        active.courier_id = Set(request.header.courier_id.clone());
        active.vehicle_plate = Set(request.header.vehicle_plate.clone());
        if let Some(status) = request.header.status {
            active.status = Set(status);
        }
        if let Some(note) = request.header.note.clone() {
            active.note = Set(Some(note));
        }
        if let Some(geo_note) = request.header.geo_note.clone() {
            active.geo_note = Set(Some(geo_note));
        }
        active.updated_at = Set(Some(Utc::now()));

        if let Err(err) = active.update(&txn).await {
            let _ = txn.rollback().await;
            return Err(map_write_err(err));
        }

        if !request.items.is_empty() {
            if let Err(err) = LineItemStore::replace_all(&txn, id, &request.items).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, shipment_id = %id, "failed to commit shipment update");
            ServiceError::TransactionFailure(e.to_string())
        })?;

        info!("shipment updated");
        self.get_shipment_details(id).await
    }

    /// Moves a shipment to `status`, merging only note/recipient/geo fields.
    /// Recipient is taken over only from courier-acting principals.
    #[instrument(skip(self, request), fields(actor = %actor.username, shipment_id = %id, new_status = %request.status))]
    pub async fn update_shipment_status(
        &self,
        actor: &Actor,
        id: &str,
        request: StatusUpdateRequest,
    ) -> Result<shipment::Model, ServiceError> {
        let db = &*self.db_pool;
        let existing = self.get_shipment(id).await?;
        validation::validate_status_update(&request, &existing)?;

        let old_status = existing.status;
        let mut active: shipment::ActiveModel = existing.into();
        active.status = Set(request.status);
        if let Some(note) = request.note {
            active.note = Set(Some(note));
        }
        if let Some(geo_note) = request.geo_note {
            active.geo_note = Set(Some(geo_note));
        }
        if actor.is_courier() {
            if let Some(recipient) = request.recipient {
                active.recipient = Set(Some(recipient));
            }
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await.map_err(map_write_err)?;
        info!(old_status = %old_status, new_status = %updated.status, "shipment status updated");
        Ok(updated)
    }

    /// Removes a shipment and its line items as a unit.
    #[instrument(skip(self), fields(actor = %actor.username, shipment_id = %id))]
    pub async fn delete_shipment(&self, actor: &Actor, id: &str) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let _existing = self.get_shipment(id).await?;
        self.ensure_no_dependents(db, id).await?;

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, shipment_id = %id, "failed to start transaction for shipment deletion");
            ServiceError::TransactionFailure(e.to_string())
        })?;

        if let Err(err) = LineItemStore::delete_for_shipment(&txn, id).await {
            let _ = txn.rollback().await;
            return Err(err);
        }
        if let Err(err) = shipment::Entity::delete_by_id(id.to_owned()).exec(&txn).await {
            let _ = txn.rollback().await;
            return Err(ServiceError::DatabaseError(err));
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, shipment_id = %id, "failed to commit shipment deletion");
            ServiceError::TransactionFailure(e.to_string())
        })?;

        info!("shipment deleted");
        Ok(())
    }

    /// Dependent-record guard. Nothing outlives a shipment today; new
    /// invariants land here.
    async fn ensure_no_dependents<C: sea_orm::ConnectionTrait>(
        &self,
        _db: &C,
        _id: &str,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Gets a shipment header by identifier.
    #[instrument(skip(self))]
    pub async fn get_shipment(&self, id: &str) -> Result<shipment::Model, ServiceError> {
        let db = &*self.db_pool;
        shipment::Entity::find_by_id(id.to_owned())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shipment {id} not found")))
    }

    /// Gets a shipment header together with its line items.
    #[instrument(skip(self))]
    pub async fn get_shipment_details(&self, id: &str) -> Result<ShipmentDetails, ServiceError> {
        let db = &*self.db_pool;
        let shipment = self.get_shipment(id).await?;
        let items = LineItemStore::get_by_shipment(db, id).await?;
        Ok(ShipmentDetails { shipment, items })
    }

    /// Lists shipments with pagination and an optional status filter.
    #[instrument(skip(self))]
    pub async fn list_shipments(
        &self,
        page: u64,
        per_page: u64,
        status: Option<ShipmentStatus>,
    ) -> Result<(Vec<shipment::Model>, u64), ServiceError> {
        let db = &*self.db_pool;

        let mut query = shipment::Entity::find();
        if let Some(status) = status {
            query = query.filter(shipment::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(shipment::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let shipments = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((shipments, total))
    }
}
