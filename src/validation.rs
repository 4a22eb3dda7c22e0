//! Validation pipeline: per-field rules, reference-existence checks, and
//! cross-field invariants.
//!
//! Every create/update path runs the same pipeline before any write. The
//! full violation list is collected and returned at once — callers never see
//! only the first failure. Reference checks are read-only lookups; the
//! pipeline itself never mutates state.

use lazy_static::lazy_static;
use regex::Regex;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::entities::shipment::ShipmentStatus;
use crate::entities::{category, courier, customer, item, shipment, user};
use crate::errors::ServiceError;
use crate::services::categories::CategoryPayload;
use crate::services::couriers::CourierPayload;
use crate::services::customers::CustomerPayload;
use crate::services::items::ItemPayload;
use crate::services::line_items::LineItemInput;
use crate::services::shipments::{CreateShipmentRequest, StatusUpdateRequest, UpdateShipmentRequest};
use crate::services::users::CreateUserRequest;

lazy_static! {
    pub static ref CATEGORY_CODE_RE: Regex = Regex::new(r"^KTG\d{2}$").unwrap();
    pub static ref ITEM_CODE_RE: Regex = Regex::new(r"^BRG\d{4}$").unwrap();
    pub static ref CUSTOMER_CODE_RE: Regex = Regex::new(r"^CST\d{4}$").unwrap();
    pub static ref COURIER_CODE_RE: Regex = Regex::new(r"^KRR\d{2}$").unwrap();
    pub static ref SHIPMENT_CODE_RE: Regex = Regex::new(r"^KRM\d{8}\d{3}$").unwrap();
    pub static ref PO_NUMBER_RE: Regex = Regex::new(r"^PO\d{11,}$").unwrap();
    pub static ref PHONE_RE: Regex = Regex::new(r"^\+?\d{6,20}$").unwrap();
}

/// Flattens derive-level validation errors into human-readable messages,
/// sorted for deterministic output. Walks nested struct and list errors so
/// violations inside embedded payloads are never dropped.
pub fn collect_violations(errors: &ValidationErrors) -> Vec<String> {
    fn walk(errors: &ValidationErrors, out: &mut Vec<String>) {
        for (field, kind) in errors.errors() {
            match kind {
                ValidationErrorsKind::Field(field_errors) => {
                    for err in field_errors {
                        match &err.message {
                            Some(msg) => out.push(msg.to_string()),
                            None => out.push(format!("{field} is invalid")),
                        }
                    }
                }
                ValidationErrorsKind::Struct(nested) => walk(nested, out),
                ValidationErrorsKind::List(nested_map) => {
                    for nested in nested_map.values() {
                        walk(nested, out);
                    }
                }
            }
        }
    }

    let mut out = Vec::new();
    walk(errors, &mut out);
    out.sort();
    out
}

/// Accumulator for the full violation list of one operation.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn absorb(&mut self, result: Result<(), ValidationErrors>) {
        if let Err(errors) = result {
            self.0.extend(collect_violations(&errors));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::ValidationError(self.0))
        }
    }
}

// ---------------------------------------------------------------------------
// Reference-existence checks (read-only)
// ---------------------------------------------------------------------------

pub async fn category_exists<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, ServiceError> {
    Ok(category::Entity::find_by_id(id.to_owned()).count(db).await? > 0)
}

pub async fn item_exists<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, ServiceError> {
    Ok(item::Entity::find_by_id(id.to_owned()).count(db).await? > 0)
}

pub async fn customer_exists<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, ServiceError> {
    Ok(customer::Entity::find_by_id(id.to_owned()).count(db).await? > 0)
}

pub async fn courier_exists<C: ConnectionTrait>(db: &C, id: &str) -> Result<bool, ServiceError> {
    Ok(courier::Entity::find_by_id(id.to_owned()).count(db).await? > 0)
}

// ---------------------------------------------------------------------------
// Natural-key uniqueness, scoped to "all other rows"
// ---------------------------------------------------------------------------

pub async fn category_name_taken<C: ConnectionTrait>(
    db: &C,
    name: &str,
    except_id: Option<&str>,
) -> Result<bool, ServiceError> {
    let mut query = category::Entity::find().filter(category::Column::Name.eq(name));
    if let Some(id) = except_id {
        query = query.filter(category::Column::Id.ne(id));
    }
    Ok(query.count(db).await? > 0)
}

pub async fn item_name_taken<C: ConnectionTrait>(
    db: &C,
    name: &str,
    except_id: Option<&str>,
) -> Result<bool, ServiceError> {
    let mut query = item::Entity::find().filter(item::Column::Name.eq(name));
    if let Some(id) = except_id {
        query = query.filter(item::Column::Id.ne(id));
    }
    Ok(query.count(db).await? > 0)
}

pub async fn customer_phone_taken<C: ConnectionTrait>(
    db: &C,
    phone: &str,
    except_id: Option<&str>,
) -> Result<bool, ServiceError> {
    let mut query = customer::Entity::find().filter(customer::Column::Phone.eq(phone));
    if let Some(id) = except_id {
        query = query.filter(customer::Column::Id.ne(id));
    }
    Ok(query.count(db).await? > 0)
}

pub async fn courier_phone_taken<C: ConnectionTrait>(
    db: &C,
    phone: &str,
    except_id: Option<&str>,
) -> Result<bool, ServiceError> {
    let mut query = courier::Entity::find().filter(courier::Column::Phone.eq(phone));
    if let Some(id) = except_id {
        query = query.filter(courier::Column::Id.ne(id));
    }
    Ok(query.count(db).await? > 0)
}

pub async fn username_taken<C: ConnectionTrait>(
    db: &C,
    username: &str,
    except_id: Option<Uuid>,
) -> Result<bool, ServiceError> {
    let mut query = user::Entity::find().filter(user::Column::Username.eq(username));
    if let Some(id) = except_id {
        query = query.filter(user::Column::Id.ne(id));
    }
    Ok(query.count(db).await? > 0)
}

/// A courier may back at most one system login.
pub async fn courier_already_linked<C: ConnectionTrait>(
    db: &C,
    courier_id: &str,
    except_user_id: Option<Uuid>,
) -> Result<bool, ServiceError> {
    let mut query = user::Entity::find().filter(user::Column::CourierId.eq(courier_id));
    if let Some(id) = except_user_id {
        query = query.filter(user::Column::Id.ne(id));
    }
    Ok(query.count(db).await? > 0)
}

// ---------------------------------------------------------------------------
// Per-entity pipelines. Create and update share these; `except_id` excludes
// the row being updated from uniqueness checks.
// ---------------------------------------------------------------------------

pub async fn validate_category<C: ConnectionTrait>(
    db: &C,
    payload: &CategoryPayload,
    except_id: Option<&str>,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    v.absorb(payload.validate());

    if !payload.name.trim().is_empty() && category_name_taken(db, &payload.name, except_id).await? {
        v.push(format!("Category name '{}' is already in use", payload.name));
    }

    v.into_result()
}

pub async fn validate_item<C: ConnectionTrait>(
    db: &C,
    payload: &ItemPayload,
    except_id: Option<&str>,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    v.absorb(payload.validate());

    if payload.price.is_sign_negative() {
        v.push("Price must not be negative");
    }
    if payload.stock < 0 {
        v.push("Stock must not be negative");
    }
    if !payload.name.trim().is_empty() && item_name_taken(db, &payload.name, except_id).await? {
        v.push(format!("Item name '{}' is already in use", payload.name));
    }
    if CATEGORY_CODE_RE.is_match(&payload.category_id)
        && !category_exists(db, &payload.category_id).await?
    {
        v.push(format!("Category {} does not exist", payload.category_id));
    }

    v.into_result()
}

pub async fn validate_customer<C: ConnectionTrait>(
    db: &C,
    payload: &CustomerPayload,
    except_id: Option<&str>,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    v.absorb(payload.validate());

    if PHONE_RE.is_match(&payload.phone)
        && customer_phone_taken(db, &payload.phone, except_id).await?
    {
        v.push(format!("Phone number {} is already in use", payload.phone));
    }

    v.into_result()
}

pub async fn validate_courier<C: ConnectionTrait>(
    db: &C,
    payload: &CourierPayload,
    except_id: Option<&str>,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    v.absorb(payload.validate());

    if PHONE_RE.is_match(&payload.phone)
        && courier_phone_taken(db, &payload.phone, except_id).await?
    {
        v.push(format!("Phone number {} is already in use", payload.phone));
    }

    v.into_result()
}

pub async fn validate_new_user<C: ConnectionTrait>(
    db: &C,
    request: &CreateUserRequest,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    v.absorb(request.validate());

    if username_taken(db, &request.username, None).await? {
        v.push(format!("Username '{}' is already in use", request.username));
    }
    if let Some(courier_id) = &request.courier_id {
        if !courier_exists(db, courier_id).await? {
            v.push(format!("Courier {courier_id} does not exist"));
        } else if courier_already_linked(db, courier_id, None).await? {
            v.push(format!("Courier {courier_id} already has a login"));
        }
    }

    v.into_result()
}

// ---------------------------------------------------------------------------
// Shipment pipelines
// ---------------------------------------------------------------------------

async fn check_line_items<C: ConnectionTrait>(
    db: &C,
    items: &[LineItemInput],
    v: &mut Violations,
) -> Result<(), ServiceError> {
    for line in items {
        v.absorb(line.validate());
        if ITEM_CODE_RE.is_match(&line.item_id) && !item_exists(db, &line.item_id).await? {
            v.push(format!("Item {} does not exist", line.item_id));
        }
    }
    Ok(())
}

async fn check_shipment_references<C: ConnectionTrait>(
    db: &C,
    customer_id: &str,
    courier_id: &str,
    v: &mut Violations,
) -> Result<(), ServiceError> {
    if CUSTOMER_CODE_RE.is_match(customer_id) && !customer_exists(db, customer_id).await? {
        v.push(format!("Customer {customer_id} does not exist"));
    }
    if COURIER_CODE_RE.is_match(courier_id) && !courier_exists(db, courier_id).await? {
        v.push(format!("Courier {courier_id} does not exist"));
    }
    Ok(())
}

fn note_is_empty(note: Option<&str>) -> bool {
    note.map_or(true, |n| n.trim().is_empty())
}

/// Cross-field invariant: any status other than Pending requires a
/// non-empty note. Runs only after all per-field rules pass.
fn check_status_note(status: ShipmentStatus, note: Option<&str>, v: &mut Violations) {
    if status != ShipmentStatus::Pending && note_is_empty(note) {
        v.push(format!("A note is required when status is {status}"));
    }
}

pub async fn validate_shipment_create<C: ConnectionTrait>(
    db: &C,
    request: &CreateShipmentRequest,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    v.absorb(request.validate());

    if let Some(id) = &request.id {
        if !SHIPMENT_CODE_RE.is_match(id) {
            v.push(format!("Shipment identifier {id} is malformed"));
        }
    }
    if let Some(po) = &request.po_number {
        if !PO_NUMBER_RE.is_match(po) {
            v.push(format!("Purchase-order number {po} is malformed"));
        }
    }
    if request.items.is_empty() {
        v.push("A shipment requires at least one line item");
    }

    check_shipment_references(db, &request.header.customer_id, &request.header.courier_id, &mut v)
        .await?;
    check_line_items(db, &request.items, &mut v).await?;

    if v.is_empty() {
        let status = request.header.status.unwrap_or(ShipmentStatus::Pending);
        check_status_note(status, request.header.note.as_deref(), &mut v);
    }

    v.into_result()
}

pub async fn validate_shipment_update<C: ConnectionTrait>(
    db: &C,
    request: &UpdateShipmentRequest,
    existing: &shipment::Model,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    v.absorb(request.validate());

    check_shipment_references(db, &request.header.customer_id, &request.header.courier_id, &mut v)
        .await?;
    check_line_items(db, &request.items, &mut v).await?;

    if v.is_empty() {
        let status = request.header.status.unwrap_or(existing.status);
        let note = request
            .header
            .note
            .as_deref()
            .or(existing.note.as_deref());
        check_status_note(status, note, &mut v);
    }

    v.into_result()
}

/// The narrow status-only path: enum membership is guaranteed by the type;
/// only the status⇒note invariant needs checking, against the note that
/// will be effective after the merge.
pub fn validate_status_update(
    request: &StatusUpdateRequest,
    existing: &shipment::Model,
) -> Result<(), ServiceError> {
    let mut v = Violations::default();
    let note = request.note.as_deref().or(existing.note.as_deref());
    check_status_note(request.status, note, &mut v);
    v.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_regexes_match_contractual_formats() {
        assert!(CATEGORY_CODE_RE.is_match("KTG01"));
        assert!(!CATEGORY_CODE_RE.is_match("KTG001"));
        assert!(ITEM_CODE_RE.is_match("BRG0001"));
        assert!(!ITEM_CODE_RE.is_match("BRG001"));
        assert!(CUSTOMER_CODE_RE.is_match("CST0001"));
        assert!(COURIER_CODE_RE.is_match("KRR01"));
        assert!(SHIPMENT_CODE_RE.is_match("KRM20240115001"));
        assert!(!SHIPMENT_CODE_RE.is_match("KRM2024011501"));
        assert!(PO_NUMBER_RE.is_match("PO20240115123"));
        assert!(PO_NUMBER_RE.is_match("PO1705312800456"));
        assert!(!PO_NUMBER_RE.is_match("PO2024"));
    }

    #[test]
    fn status_note_rule_only_bites_non_pending() {
        let mut v = Violations::default();
        check_status_note(ShipmentStatus::Pending, None, &mut v);
        assert!(v.is_empty());

        check_status_note(ShipmentStatus::InTransit, Some("  "), &mut v);
        assert!(!v.is_empty());

        let mut v = Violations::default();
        check_status_note(ShipmentStatus::Delivered, Some("received by guard"), &mut v);
        assert!(v.is_empty());
    }

    #[test]
    fn violations_convert_to_full_list_error() {
        let mut v = Violations::default();
        v.push("first");
        v.push("second");
        match v.into_result() {
            Err(ServiceError::ValidationError(list)) => assert_eq!(list.len(), 2),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }
}
