//! Typed rows for the three datasets

use serde::{Deserialize, Serialize};

/// One of the three datasets a bulk load carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Entities,
    Items,
    Records,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [DatasetKind::Entities, DatasetKind::Items, DatasetKind::Records];

    /// Stable label used in logs, error prefixes and upload field names
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Entities => "entities",
            DatasetKind::Items => "items",
            DatasetKind::Records => "records",
        }
    }

    /// Backing table
    pub fn table(&self) -> &'static str {
        match self {
            DatasetKind::Entities => "entities",
            DatasetKind::Items => "catalog_items",
            DatasetKind::Records => "records",
        }
    }

    /// Singular noun for row-level messages
    pub fn noun(&self) -> &'static str {
        match self {
            DatasetKind::Entities => "entity",
            DatasetKind::Items => "item",
            DatasetKind::Records => "record",
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows identified by a dataset-unique string id
pub trait Keyed {
    fn id(&self) -> &str;
}

/// A user-like row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A priced, purchasable row; `price` is always finite and positive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub price: f64,
}

/// Links one entity and one catalog item with a positive quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub entity_ref: String,
    pub item_ref: String,
    pub quantity: i32,
}

impl Keyed for Entity {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Keyed for CatalogItem {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Keyed for Record {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A checked, de-duplicated batch of independent rows ready for one insert
#[derive(Debug, Clone, PartialEq)]
pub enum StagedBatch {
    Entities(Vec<Entity>),
    Items(Vec<CatalogItem>),
}

impl StagedBatch {
    pub fn kind(&self) -> DatasetKind {
        match self {
            StagedBatch::Entities(_) => DatasetKind::Entities,
            StagedBatch::Items(_) => DatasetKind::Items,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StagedBatch::Entities(rows) => rows.len(),
            StagedBatch::Items(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Entity>> for StagedBatch {
    fn from(rows: Vec<Entity>) -> Self {
        StagedBatch::Entities(rows)
    }
}

impl From<Vec<CatalogItem>> for StagedBatch {
    fn from(rows: Vec<CatalogItem>) -> Self {
        StagedBatch::Items(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_labels_are_distinct() {
        let labels: std::collections::HashSet<_> =
            DatasetKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(labels.len(), 3);
        assert_eq!(DatasetKind::Items.table(), "catalog_items");
        assert_eq!(DatasetKind::Records.to_string(), "records");
    }

    #[test]
    fn test_staged_batch_kind_follows_rows() {
        let batch: StagedBatch = vec![CatalogItem {
            id: "p1".to_string(),
            name: "Pen".to_string(),
            price: 1.5,
        }]
        .into();
        assert_eq!(batch.kind(), DatasetKind::Items);
        assert_eq!(batch.len(), 1);
        assert!(StagedBatch::Entities(Vec::new()).is_empty());
    }
}
