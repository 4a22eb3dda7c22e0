use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shipment status enumeration.
///
/// Membership is validated everywhere a status enters the system; strict
/// progression (Pending → InTransit → Delivered) is intentionally NOT
/// enforced — any defined value supplied by a caller is accepted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(ascii_case_insensitive)]
pub enum ShipmentStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,

    #[sea_orm(string_value = "InTransit")]
    InTransit,

    #[sea_orm(string_value = "Delivered")]
    Delivered,

    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipmentStatus::Pending => write!(f, "Pending"),
            ShipmentStatus::InTransit => write!(f, "InTransit"),
            ShipmentStatus::Delivered => write!(f, "Delivered"),
            ShipmentStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Shipment header. The business code (`KRM{YYYYMMDD}{seq}`) is the primary
/// key and immutable after creation; line items hang off `shipment_item`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub shipment_date: Date,
    pub customer_id: String,
    pub courier_id: String,
    pub vehicle_plate: String,
    #[sea_orm(unique)]
    pub po_number: String,
    pub status: ShipmentStatus,
    pub note: Option<String>,
    /// Set only through the status-only update path used by courier logins.
    pub recipient: Option<String>,
    pub geo_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::courier::Entity",
        from = "Column::CourierId",
        to = "super::courier::Column::Id"
    )]
    Courier,
    #[sea_orm(has_many = "super::shipment_item::Entity")]
    Items,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::courier::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Courier.def()
    }
}

impl Related<super::shipment_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            ShipmentStatus::from_str("intransit").unwrap(),
            ShipmentStatus::InTransit
        );
        assert_eq!(
            ShipmentStatus::from_str("Delivered").unwrap(),
            ShipmentStatus::Delivered
        );
        assert!(ShipmentStatus::from_str("Teleported").is_err());
    }

    #[test]
    fn status_display_round_trips() {
        for status in [
            ShipmentStatus::Pending,
            ShipmentStatus::InTransit,
            ShipmentStatus::Delivered,
            ShipmentStatus::Cancelled,
        ] {
            assert_eq!(
                ShipmentStatus::from_str(&status.to_string()).unwrap(),
                status
            );
        }
    }
}
