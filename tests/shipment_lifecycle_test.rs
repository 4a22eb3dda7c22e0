//! End-to-end tests for the shipment lifecycle: transactional create/update
//! of header plus line items, status transitions, and deletion.

mod common;

use assert_matches::assert_matches;
use common::{date, shipment_request, TestApp};
use kiriman_core::entities::shipment::ShipmentStatus;
use kiriman_core::services::line_items::{LineItemInput, LineItemStore};
use kiriman_core::services::shipments::{
    ShipmentHeader, StatusUpdateRequest, UpdateShipmentRequest,
};
use kiriman_core::validation::{PO_NUMBER_RE, SHIPMENT_CODE_RE};
use kiriman_core::ServiceError;
use sea_orm::TransactionTrait;

fn update_request(items: Vec<(&str, i32)>) -> UpdateShipmentRequest {
    UpdateShipmentRequest {
        header: ShipmentHeader {
            shipment_date: date(2024, 1, 15),
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

// ==================== Creation ====================

#[tokio::test]
async fn create_mints_identifiers_and_defaults_to_pending() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let details = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 5)]),
        )
        .await
        .unwrap();

    assert!(SHIPMENT_CODE_RE.is_match(&details.shipment.id));
    assert!(details.shipment.id.starts_with("KRM20240115"));
    assert!(PO_NUMBER_RE.is_match(&details.shipment.po_number));
    assert_eq!(details.shipment.status, ShipmentStatus::Pending);
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 5);

    // Read back through the detail path.
    let fetched = shipments
        .get_shipment_details(&details.shipment.id)
        .await
        .unwrap();
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0].item_id, "BRG0001");
}

#[tokio::test]
async fn create_rejects_empty_line_items() {
    let app = TestApp::new().await;
    app.seed_master_data().await;

    let err = app
        .shipments()
        .create_shipment(&app.admin(), shipment_request(date(2024, 1, 15), vec![]))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(ref violations) if violations
        .iter()
        .any(|v| v.contains("at least one line item")));
}

#[tokio::test]
async fn create_collects_the_full_violation_list() {
    let app = TestApp::new().await;
    app.seed_master_data().await;

    let mut request = shipment_request(date(2024, 1, 15), vec![("BRG9999", 0)]);
    request.header.customer_id = "CST9999".to_string();

    let err = app
        .shipments()
        .create_shipment(&app.admin(), request)
        .await
        .unwrap_err();

    match err {
        ServiceError::ValidationError(violations) => {
            assert!(violations.iter().any(|v| v.contains("CST9999")));
            assert!(violations.iter().any(|v| v.contains("BRG9999")));
            assert!(violations.iter().any(|v| v.contains("Quantity")));
        }
        other => panic!("expected ValidationError, got {other:?}"),
    }
}

#[tokio::test]
async fn create_with_non_pending_status_requires_a_note() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let mut request = shipment_request(date(2024, 1, 15), vec![("BRG0001", 1)]);
    request.header.status = Some(ShipmentStatus::InTransit);

    let err = shipments
        .create_shipment(&app.admin(), request.clone())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    request.header.note = Some("left warehouse at 08:00".to_string());
    let details = shipments
        .create_shipment(&app.admin(), request)
        .await
        .unwrap();
    assert_eq!(details.shipment.status, ShipmentStatus::InTransit);
}

#[tokio::test]
async fn create_with_explicit_duplicate_identifier_conflicts_without_retry() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let first = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 1)]),
        )
        .await
        .unwrap();

    let mut request = shipment_request(date(2024, 1, 15), vec![("BRG0001", 2)]);
    request.id = Some(first.shipment.id.clone());

    let err = shipments
        .create_shipment(&app.admin(), request)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    // The failed attempt left the original shipment's items untouched.
    let details = shipments
        .get_shipment_details(&first.shipment.id)
        .await
        .unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 1);
}

#[tokio::test]
async fn failed_create_leaves_no_partial_shipment_behind() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let first = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 1)]),
        )
        .await
        .unwrap();

    // A caller-supplied PO that is already taken can never be placed; the
    // bounded retry loop regenerates the shipment id in vain and gives up.
    let mut request = shipment_request(date(2024, 1, 15), vec![("BRG0001", 9)]);
    request.po_number = Some(first.shipment.po_number.clone());

    let err = shipments
        .create_shipment(&app.admin(), request)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::GenerationExhausted(_));

    // No header row was committed for any of the candidate identifiers.
    let err = shipments.get_shipment("KRM20240115002").await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

// ==================== Update ====================

#[tokio::test]
async fn update_with_empty_items_leaves_existing_items_untouched() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let created = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 5)]),
        )
        .await
        .unwrap();

    let mut request = update_request(vec![]);
    request.header.vehicle_plate = "B9876ABC".to_string();

    let updated = shipments
        .update_shipment(&app.admin(), &created.shipment.id, request)
        .await
        .unwrap();

    assert_eq!(updated.shipment.vehicle_plate, "B9876ABC");
    assert_eq!(updated.items.len(), 1);
    assert_eq!(updated.items[0].quantity, 5);
}

#[tokio::test]
async fn update_with_items_replaces_the_full_set() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let admin = app.admin();
    let shipments = app.shipments();

    // A second item to swap in.
    app.items()
        .create_item(
            &admin,
            None,
            kiriman_core::services::items::ItemPayload {
                category_id: "KTG01".to_string(),
                name: "Network Switch".to_string(),
                unit: "pcs".to_string(),
                price: rust_decimal_macros::dec!(750000),
                stock: 10,
                description: None,
            },
        )
        .await
        .unwrap();

    let created = shipments
        .create_shipment(&admin, shipment_request(date(2024, 1, 15), vec![("BRG0001", 5)]))
        .await
        .unwrap();

    let updated = shipments
        .update_shipment(
            &admin,
            &created.shipment.id,
            update_request(vec![("BRG0002", 3)]),
        )
        .await
        .unwrap();

    assert_eq!(updated.items.len(), 1);
    assert_eq!(updated.items[0].item_id, "BRG0002");
    assert_eq!(updated.items[0].quantity, 3);
}

#[tokio::test]
async fn update_of_missing_shipment_is_not_found() {
    let app = TestApp::new().await;
    app.seed_master_data().await;

    let err = app
        .shipments()
        .update_shipment(&app.admin(), "KRM20240115099", update_request(vec![]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn item_writes_share_the_callers_transaction() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let created = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 5)]),
        )
        .await
        .unwrap();

    // A replace that the caller rolls back must not be observable.
    let txn = app.db.begin().await.unwrap();
    LineItemStore::replace_all(
        &txn,
        &created.shipment.id,
        &[LineItemInput {
            item_id: "BRG0001".to_string(),
            quantity: 99,
        }],
    )
    .await
    .unwrap();
    txn.rollback().await.unwrap();

    let details = shipments
        .get_shipment_details(&created.shipment.id)
        .await
        .unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 5);
}

// ==================== Status transitions ====================

#[tokio::test]
async fn status_update_requires_note_for_non_pending() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let created = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 1)]),
        )
        .await
        .unwrap();

    let err = shipments
        .update_shipment_status(
            &app.courier_actor(),
            &created.shipment.id,
            StatusUpdateRequest {
                status: ShipmentStatus::Delivered,
                note: None,
                recipient: None,
                geo_note: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let updated = shipments
        .update_shipment_status(
            &app.courier_actor(),
            &created.shipment.id,
            StatusUpdateRequest {
                status: ShipmentStatus::Delivered,
                note: Some("received in full".to_string()),
                recipient: Some("Ibu Sari".to_string()),
                geo_note: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, ShipmentStatus::Delivered);
    assert_eq!(updated.recipient.as_deref(), Some("Ibu Sari"));
}

#[tokio::test]
async fn recipient_is_only_taken_from_courier_actors() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let created = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 1)]),
        )
        .await
        .unwrap();

    let updated = shipments
        .update_shipment_status(
            &app.admin(),
            &created.shipment.id,
            StatusUpdateRequest {
                status: ShipmentStatus::InTransit,
                note: Some("loaded onto truck".to_string()),
                recipient: Some("should be ignored".to_string()),
                geo_note: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, ShipmentStatus::InTransit);
    assert_eq!(updated.recipient, None);
}

#[tokio::test]
async fn status_progression_is_not_enforced() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let created = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 1)]),
        )
        .await
        .unwrap();

    for status in [
        ShipmentStatus::Delivered,
        ShipmentStatus::Pending,
        ShipmentStatus::Cancelled,
        ShipmentStatus::InTransit,
    ] {
        let updated = shipments
            .update_shipment_status(
                &app.courier_actor(),
                &created.shipment.id,
                StatusUpdateRequest {
                    status,
                    note: Some("status walk".to_string()),
                    recipient: None,
                    geo_note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, status);
    }
}

// ==================== Deletion ====================

#[tokio::test]
async fn delete_removes_header_and_items_as_a_unit() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let created = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 5)]),
        )
        .await
        .unwrap();

    shipments
        .delete_shipment(&app.admin(), &created.shipment.id)
        .await
        .unwrap();

    let err = shipments
        .get_shipment(&created.shipment.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let orphans = LineItemStore::get_by_shipment(&*app.db, &created.shipment.id)
        .await
        .unwrap();
    assert!(orphans.is_empty());
}

#[tokio::test]
async fn delete_of_missing_shipment_is_not_found() {
    let app = TestApp::new().await;

    let err = app
        .shipments()
        .delete_shipment(&app.admin(), "KRM20240115001")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

// ==================== Listing ====================

#[tokio::test]
async fn list_filters_by_status() {
    let app = TestApp::new().await;
    app.seed_master_data().await;
    let shipments = app.shipments();

    let first = shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 15), vec![("BRG0001", 1)]),
        )
        .await
        .unwrap();
    shipments
        .create_shipment(
            &app.admin(),
            shipment_request(date(2024, 1, 16), vec![("BRG0001", 2)]),
        )
        .await
        .unwrap();

    shipments
        .update_shipment_status(
            &app.courier_actor(),
            &first.shipment.id,
            StatusUpdateRequest {
                status: ShipmentStatus::Delivered,
                note: Some("done".to_string()),
                recipient: None,
                geo_note: None,
            },
        )
        .await
        .unwrap();

    let (all, total) = shipments.list_shipments(1, 10, None).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(all.len(), 2);

    let (delivered, delivered_total) = shipments
        .list_shipments(1, 10, Some(ShipmentStatus::Delivered))
        .await
        .unwrap();
    assert_eq!(delivered_total, 1);
    assert_eq!(delivered[0].id, first.shipment.id);
}
