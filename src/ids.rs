//! Business identifier generation.
//!
//! Sequential codes (`KTG01`, `BRG0001`, `CST0001`, `KRR01`,
//! `KRM{YYYYMMDD}{seq}`) are minted by re-reading the greatest existing code
//! for a prefix and incrementing its suffix. Generation is advisory, not a
//! reservation: two concurrent callers can compute the same candidate, and
//! the primary-key constraint at insert time is the arbiter. Callers wrap
//! generation + insert in a bounded retry loop and try again on `Conflict`.
//!
//! Purchase-order numbers use a different collision domain: a sub-second
//! clock component first, a randomized sequence once contention is observed,
//! and a coarse timestamp fallback when the bounded loop is exhausted.

use chrono::{NaiveDate, Utc};
use rand::Rng;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use std::time::Duration;
use tracing::{debug, warn};

use crate::entities::{category, courier, customer, item, shipment};
use crate::errors::ServiceError;

/// Entity classes with a fixed-prefix sequential code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Category,
    Item,
    Customer,
    Courier,
}

impl CodeKind {
    pub fn prefix(self) -> &'static str {
        match self {
            CodeKind::Category => "KTG",
            CodeKind::Item => "BRG",
            CodeKind::Customer => "CST",
            CodeKind::Courier => "KRR",
        }
    }

    /// Fixed width of the zero-padded numeric suffix.
    pub fn width(self) -> usize {
        match self {
            CodeKind::Category | CodeKind::Courier => 2,
            CodeKind::Item | CodeKind::Customer => 4,
        }
    }
}

pub const SHIPMENT_PREFIX: &str = "KRM";
pub const SHIPMENT_SEQ_WIDTH: usize = 3;

/// Bound for the generate-then-insert retry loops wrapped around every
/// create path that mints a code.
pub const GENERATE_INSERT_ATTEMPTS: u32 = 5;

const PO_MAX_ATTEMPTS: u32 = 100;
const PO_RETRY_DELAY: Duration = Duration::from_millis(3);

/// Computes the successor of `greatest` within the `prefix` code space.
///
/// Returns the seed code (`{prefix}0…01`) when no code exists yet. The
/// suffix never wraps: exceeding the fixed width is a hard error.
pub fn bump_code(
    prefix: &str,
    width: usize,
    greatest: Option<&str>,
) -> Result<String, ServiceError> {
    let next = match greatest {
        None => 1u64,
        Some(code) => {
            let suffix = code.strip_prefix(prefix).ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "stored identifier {code} does not carry prefix {prefix}"
                ))
            })?;
            let current: u64 = suffix.parse().map_err(|_| {
                ServiceError::InternalError(format!(
                    "stored identifier {code} has a non-numeric suffix"
                ))
            })?;
            current + 1
        }
    };

    let rendered = format!("{next:0width$}");
    if rendered.len() > width {
        return Err(ServiceError::GenerationExhausted(format!(
            "identifier space for prefix {prefix} ({width} digits) is exhausted"
        )));
    }

    Ok(format!("{prefix}{rendered}"))
}

/// Produces the next sequential business code for `kind`.
///
/// Advisory only — the caller must insert under the unique identifier
/// constraint and retry on `Conflict`.
pub async fn next_code<C: ConnectionTrait>(db: &C, kind: CodeKind) -> Result<String, ServiceError> {
    let greatest = match kind {
        CodeKind::Category => category::Entity::find()
            .filter(category::Column::Id.starts_with(kind.prefix()))
            .order_by_desc(category::Column::Id)
            .one(db)
            .await?
            .map(|m| m.id),
        CodeKind::Item => item::Entity::find()
            .filter(item::Column::Id.starts_with(kind.prefix()))
            .order_by_desc(item::Column::Id)
            .one(db)
            .await?
            .map(|m| m.id),
        CodeKind::Customer => customer::Entity::find()
            .filter(customer::Column::Id.starts_with(kind.prefix()))
            .order_by_desc(customer::Column::Id)
            .one(db)
            .await?
            .map(|m| m.id),
        CodeKind::Courier => courier::Entity::find()
            .filter(courier::Column::Id.starts_with(kind.prefix()))
            .order_by_desc(courier::Column::Id)
            .one(db)
            .await?
            .map(|m| m.id),
    };

    bump_code(kind.prefix(), kind.width(), greatest.as_deref())
}

/// Produces the next shipment code for `date`. The 3-digit sequence is
/// scoped to the date-encoded prefix, so it restarts each day.
pub async fn next_shipment_code<C: ConnectionTrait>(
    db: &C,
    date: NaiveDate,
) -> Result<String, ServiceError> {
    let prefix = format!("{SHIPMENT_PREFIX}{}", date.format("%Y%m%d"));
    let greatest = shipment::Entity::find()
        .filter(shipment::Column::Id.starts_with(prefix.as_str()))
        .order_by_desc(shipment::Column::Id)
        .one(db)
        .await?
        .map(|m| m.id);

    bump_code(&prefix, SHIPMENT_SEQ_WIDTH, greatest.as_deref())
}

/// Produces a unique, date-encoded purchase-order number
/// (`PO{YYYY}{MM}{DD}{3-digit}`).
///
/// The first attempt derives the 3-digit sequence from the sub-second clock
/// so numbers stay time-ordered in the common case. After the first observed
/// collision the sequence switches to random draws, with a short sleep
/// between attempts to de-synchronize callers sharing a millisecond bucket.
/// When the bounded loop is exhausted, falls back to
/// `PO{unix-timestamp}{3-digit}` — readable date encoding is sacrificed for
/// guaranteed termination.
pub async fn next_po_number<C: ConnectionTrait>(db: &C) -> Result<String, ServiceError> {
    let mut randomized = false;

    for attempt in 1..=PO_MAX_ATTEMPTS {
        let now = Utc::now();
        let seq = if randomized {
            rand::thread_rng().gen_range(0..1000u32)
        } else {
            now.timestamp_subsec_millis() % 1000
        };
        let candidate = format!("PO{}{seq:03}", now.format("%Y%m%d"));

        let taken = shipment::Entity::find()
            .filter(shipment::Column::PoNumber.eq(candidate.as_str()))
            .count(db)
            .await?
            > 0;
        if !taken {
            return Ok(candidate);
        }

        debug!(attempt, %candidate, "purchase-order number collision, retrying");
        randomized = true;
        tokio::time::sleep(PO_RETRY_DELAY).await;
    }

    let fallback = format!(
        "PO{}{:03}",
        Utc::now().timestamp(),
        rand::thread_rng().gen_range(0..1000u32)
    );
    warn!(
        po_number = %fallback,
        attempts = PO_MAX_ATTEMPTS,
        "purchase-order sequence space contended, using timestamp fallback"
    );
    Ok(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use test_case::test_case;

    #[test_case(CodeKind::Category, "KTG", 2)]
    #[test_case(CodeKind::Item, "BRG", 4)]
    #[test_case(CodeKind::Customer, "CST", 4)]
    #[test_case(CodeKind::Courier, "KRR", 2)]
    fn code_kinds_carry_contractual_prefix_and_width(kind: CodeKind, prefix: &str, width: usize) {
        assert_eq!(kind.prefix(), prefix);
        assert_eq!(kind.width(), width);
    }

    #[test]
    fn bump_code_seeds_empty_code_space() {
        assert_eq!(bump_code("KTG", 2, None).unwrap(), "KTG01");
        assert_eq!(bump_code("BRG", 4, None).unwrap(), "BRG0001");
        assert_eq!(bump_code("KRM20240115", 3, None).unwrap(), "KRM20240115001");
    }

    #[test]
    fn bump_code_increments_and_repads() {
        assert_eq!(bump_code("KTG", 2, Some("KTG07")).unwrap(), "KTG08");
        assert_eq!(bump_code("BRG", 4, Some("BRG0099")).unwrap(), "BRG0100");
        assert_eq!(
            bump_code("KRM20240115", 3, Some("KRM20240115009")).unwrap(),
            "KRM20240115010"
        );
    }

    #[test]
    fn bump_code_fails_hard_on_overflow() {
        assert_matches!(
            bump_code("KTG", 2, Some("KTG99")),
            Err(ServiceError::GenerationExhausted(_))
        );
    }

    #[test]
    fn bump_code_rejects_corrupt_suffix() {
        assert_matches!(
            bump_code("KTG", 2, Some("KTGXX")),
            Err(ServiceError::InternalError(_))
        );
        assert_matches!(
            bump_code("KTG", 2, Some("BRG01")),
            Err(ServiceError::InternalError(_))
        );
    }
}
