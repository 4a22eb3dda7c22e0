#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tempfile::TempDir;

use kiriman_core::auth::Actor;
use kiriman_core::cache::LookupCache;
use kiriman_core::config::AppConfig;
use kiriman_core::db::{self, DbPool};
use kiriman_core::entities::user::Role;
use kiriman_core::services::categories::{CategoryPayload, CategoryService};
use kiriman_core::services::couriers::{CourierPayload, CourierService};
use kiriman_core::services::customers::{CustomerPayload, CustomerService};
use kiriman_core::services::items::{ItemPayload, ItemService};
use kiriman_core::services::line_items::LineItemInput;
use kiriman_core::services::shipments::{
    CreateShipmentRequest, ShipmentHeader, ShipmentService,
};
use kiriman_core::services::users::UserService;

/// Helper harness backing every test with a fresh sqlite database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub cache: Arc<LookupCache>,
    _tmp: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().expect("temp dir for test database");
        let db_path = tmp.path().join("kiriman_test.db");

        let mut cfg = AppConfig::new(format!("sqlite://{}?mode=rwc", db_path.display()));
        cfg.environment = "test".to_string();
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.auto_migrate = true;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        Self {
            db: Arc::new(pool),
            cache: Arc::new(LookupCache::new(Duration::from_secs(60))),
            _tmp: tmp,
        }
    }

    pub fn admin(&self) -> Actor {
        Actor::new("admin", Role::Admin)
    }

    pub fn courier_actor(&self) -> Actor {
        Actor::courier("budi", "KRR01")
    }

    pub fn categories(&self) -> CategoryService {
        CategoryService::new(self.db.clone(), self.cache.clone())
    }

    pub fn items(&self) -> ItemService {
        ItemService::new(self.db.clone())
    }

    pub fn customers(&self) -> CustomerService {
        CustomerService::new(self.db.clone(), self.cache.clone())
    }

    pub fn couriers(&self) -> CourierService {
        CourierService::new(self.db.clone(), self.cache.clone())
    }

    pub fn users(&self) -> UserService {
        UserService::new(self.db.clone())
    }

    pub fn shipments(&self) -> ShipmentService {
        ShipmentService::new(self.db.clone())
    }

    /// Seeds one row of each master entity: `KTG01`, `BRG0001`, `CST0001`,
    /// `KRR01`. Most shipment tests build on these.
    pub async fn seed_master_data(&self) {
        let admin = self.admin();

        self.categories()
            .create_category(
                &admin,
                None,
                CategoryPayload {
                    name: "Electronics".to_string(),
                    description: None,
                },
            )
            .await
            .expect("seed category");

        self.items()
            .create_item(
                &admin,
                None,
                ItemPayload {
                    category_id: "KTG01".to_string(),
                    name: "Wireless Router".to_string(),
                    unit: "pcs".to_string(),
                    price: rust_decimal_macros::dec!(450000),
                    stock: 25,
                    description: None,
                },
            )
            .await
            .expect("seed item");

        self.customers()
            .create_customer(
                &admin,
                None,
                CustomerPayload {
                    name: "PT Maju Jaya".to_string(),
                    phone: "081234567890".to_string(),
                    address: "Jl. Sudirman 10, Jakarta".to_string(),
                },
            )
            .await
            .expect("seed customer");

        self.couriers()
            .create_courier(
                &admin,
                None,
                CourierPayload {
                    name: "Budi Santoso".to_string(),
                    phone: "081298765432".to_string(),
                },
            )
            .await
            .expect("seed courier");
    }
}

/// Builds a create request against the seeded master data.
pub fn shipment_request(date: NaiveDate, items: Vec<(&str, i32)>) -> CreateShipmentRequest {
    CreateShipmentRequest {
        id: None,
        po_number: None,
        header: ShipmentHeader {
            shipment_date: date,
            customer_id: "CST0001".to_string(),
            courier_id: "KRR01".to_string(),
            vehicle_plate: "B1234XYZ".to_string(),
            status: None,
            note: None,
            geo_note: None,
        },
        items: items
            .into_iter()
            .map(|(item_id, quantity)| LineItemInput {
                item_id: item_id.to_string(),
                quantity,
            })
            .collect(),
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
