//! Row validators for the three datasets
//!
//! Validation is pure: it partitions raw rows into typed rows and one
//! [`RowError`] per rejected row, and never fails the batch as a whole.
//!
//! # Rules
//!
//! - entities: `id`, `name`, `email` present and non-empty (email format is not checked)
//! - items: `id`, `name`, `price` present; `price` a finite float `> 0`
//! - records: `id`, `entity_ref`, `item_ref`, `quantity` present; `quantity` an integer `> 0`

use crate::csv_source::{MalformedRow, RawRow};
use crate::error::{RowError, RowLabel};
use crate::model::{CatalogItem, DatasetKind, Entity, Record};

/// Accepted header names, canonical first
pub mod columns {
    pub const ID: &[&str] = &["id"];
    pub const NAME: &[&str] = &["name"];
    pub const EMAIL: &[&str] = &["email"];
    pub const PRICE: &[&str] = &["price"];
    pub const QUANTITY: &[&str] = &["quantity"];
    pub const ENTITY_REF: &[&str] = &["entity_ref", "entityRef", "user_id"];
    pub const ITEM_REF: &[&str] = &["item_ref", "itemRef", "product_id"];
}

/// Outcome of validating one dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Validation<T> {
    pub errors: Vec<RowError>,
    pub valid: Vec<T>,
    /// Number of input rows, including rejected ones
    pub total: usize,
}

impl<T> Validation<T> {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Turns one raw row into a typed row of a specific dataset
pub trait RowValidator {
    type Row;

    const KIND: DatasetKind;

    fn check(raw: &RawRow) -> Result<Self::Row, RowError>;

    fn validate(rows: Vec<Result<RawRow, MalformedRow>>) -> Validation<Self::Row> {
        let total = rows.len();
        let mut errors = Vec::new();
        let mut valid = Vec::with_capacity(total);

        for row in rows {
            let checked = match row {
                Ok(raw) => Self::check(&raw),
                Err(malformed) => Err(RowError::Malformed {
                    noun: Self::KIND.noun(),
                    line: malformed.line,
                    reason: malformed.reason,
                }),
            };
            match checked {
                Ok(row) => valid.push(row),
                Err(e) => errors.push(e),
            }
        }

        tracing::debug!(
            dataset = %Self::KIND,
            valid = valid.len(),
            rejected = errors.len(),
            "Validation complete"
        );

        Validation { errors, valid, total }
    }
}

pub struct EntityValidator;
pub struct ItemValidator;
pub struct RecordValidator;

impl RowValidator for EntityValidator {
    type Row = Entity;

    const KIND: DatasetKind = DatasetKind::Entities;

    fn check(raw: &RawRow) -> Result<Entity, RowError> {
        let [id, name, email] = require(
            raw,
            Self::KIND,
            [("id", columns::ID), ("name", columns::NAME), ("email", columns::EMAIL)],
        )?;

        Ok(Entity {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
        })
    }
}

impl RowValidator for ItemValidator {
    type Row = CatalogItem;

    const KIND: DatasetKind = DatasetKind::Items;

    fn check(raw: &RawRow) -> Result<CatalogItem, RowError> {
        let [id, name, price] = require(
            raw,
            Self::KIND,
            [("id", columns::ID), ("name", columns::NAME), ("price", columns::PRICE)],
        )?;

        let parsed: f64 = price.trim().parse().map_err(|_| RowError::UnparsablePrice {
            id: id.to_string(),
            value: price.to_string(),
        })?;

        if !parsed.is_finite() || parsed <= 0.0 {
            return Err(RowError::InvalidPrice {
                id: id.to_string(),
                price: parsed,
            });
        }

        Ok(CatalogItem {
            id: id.to_string(),
            name: name.to_string(),
            price: parsed,
        })
    }
}

impl RowValidator for RecordValidator {
    type Row = Record;

    const KIND: DatasetKind = DatasetKind::Records;

    fn check(raw: &RawRow) -> Result<Record, RowError> {
        let [id, entity_ref, item_ref, quantity] = require(
            raw,
            Self::KIND,
            [
                ("id", columns::ID),
                ("entity_ref", columns::ENTITY_REF),
                ("item_ref", columns::ITEM_REF),
                ("quantity", columns::QUANTITY),
            ],
        )?;

        let parsed: i32 = quantity.trim().parse().map_err(|_| RowError::UnparsableQuantity {
            id: id.to_string(),
            value: quantity.to_string(),
        })?;

        if parsed <= 0 {
            return Err(RowError::InvalidQuantity {
                id: id.to_string(),
                quantity: parsed,
            });
        }

        Ok(Record {
            id: id.to_string(),
            entity_ref: entity_ref.to_string(),
            item_ref: item_ref.to_string(),
            quantity: parsed,
        })
    }
}

/// Fetch required non-empty columns, or report every one that is missing
fn require<'a, const N: usize>(
    raw: &'a RawRow,
    kind: DatasetKind,
    fields: [(&'static str, &[&str]); N],
) -> Result<[&'a str; N], RowError> {
    let values = fields.map(|(_, names)| raw.non_empty(names));

    let missing: Vec<&str> = fields
        .iter()
        .zip(values.iter())
        .filter(|(_, value)| value.is_none())
        .map(|((field, _), _)| *field)
        .collect();

    if missing.is_empty() {
        return Ok(values.map(Option::unwrap_or_default));
    }

    let label = match raw.non_empty(columns::ID) {
        Some(id) => RowLabel::Id(id.to_string()),
        None => RowLabel::Raw {
            line: raw.line,
            content: raw.to_string(),
        },
    };

    Err(RowError::MissingFields {
        noun: kind.noun(),
        label,
        fields: missing.join(", "),
    })
}
