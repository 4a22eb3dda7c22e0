//! Persistence for the line items owned by a shipment.
//!
//! The store operates strictly inside the caller's transaction — it never
//! begins or commits one of its own, so commit authority stays with the
//! lifecycle orchestrator.

use chrono::Utc;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::entities::shipment_item;
use crate::errors::{map_write_err, ServiceError};

/// One item+quantity pair supplied by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineItemInput {
    #[validate(regex(
        path = "crate::validation::ITEM_CODE_RE",
        message = "Item code must match the BRG0000 format"
    ))]
    pub item_id: String,
    #[validate(range(min = 1, message = "Quantity must be a positive number"))]
    pub quantity: i32,
}

pub struct LineItemStore;

impl LineItemStore {
    /// Replaces the full line-item set of `shipment_id`: delete-then-insert,
    /// not diff/merge. Runs on the caller's connection (usually an open
    /// transaction); a failure aborts the whole replace via the caller's
    /// rollback, never a partial insert.
    pub async fn replace_all<C: ConnectionTrait>(
        conn: &C,
        shipment_id: &str,
        items: &[LineItemInput],
    ) -> Result<(), ServiceError> {
        Self::delete_for_shipment(conn, shipment_id).await?;

        let now = Utc::now();
        let rows: Vec<shipment_item::ActiveModel> = items
            .iter()
            .map(|line| shipment_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                shipment_id: Set(shipment_id.to_owned()),
                item_id: Set(line.item_id.clone()),
                quantity: Set(line.quantity),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            })
            .collect();

        if !rows.is_empty() {
            shipment_item::Entity::insert_many(rows)
                .exec(conn)
                .await
                .map_err(map_write_err)?;
        }

        Ok(())
    }

    /// Removes every line item belonging to `shipment_id`.
    pub async fn delete_for_shipment<C: ConnectionTrait>(
        conn: &C,
        shipment_id: &str,
    ) -> Result<(), ServiceError> {
        shipment_item::Entity::delete_many()
            .filter(shipment_item::Column::ShipmentId.eq(shipment_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Read path: the line items of one shipment in stable order.
    pub async fn get_by_shipment<C: ConnectionTrait>(
        conn: &C,
        shipment_id: &str,
    ) -> Result<Vec<shipment_item::Model>, ServiceError> {
        let items = shipment_item::Entity::find()
            .filter(shipment_item::Column::ShipmentId.eq(shipment_id))
            .order_by_asc(shipment_item::Column::ItemId)
            .all(conn)
            .await?;
        Ok(items)
    }
}
