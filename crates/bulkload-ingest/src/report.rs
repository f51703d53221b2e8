//! Aggregated result of one ingestion run

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineOutcome;

/// Per-dataset error messages and creation counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub entities_errors: Vec<String>,
    pub items_errors: Vec<String>,
    pub records_errors: Vec<String>,
    pub entities_created: usize,
    pub items_created: usize,
    pub records_created: usize,
}

impl Report {
    pub fn aggregate(entities: PipelineOutcome, items: PipelineOutcome, records: PipelineOutcome) -> Self {
        Self {
            entities_errors: entities.errors,
            items_errors: items.errors,
            records_errors: records.errors,
            entities_created: entities.created,
            items_created: items.created,
            records_created: records.created,
        }
    }

    pub fn total_created(&self) -> usize {
        self.entities_created + self.items_created + self.records_created
    }

    pub fn total_errors(&self) -> usize {
        self.entities_errors.len() + self.items_errors.len() + self.records_errors.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_keeps_each_dataset_apart() {
        let report = Report::aggregate(
            PipelineOutcome {
                errors: vec!["skipping duplicate id u1".to_string()],
                created: 1,
            },
            PipelineOutcome {
                errors: Vec::new(),
                created: 4,
            },
            PipelineOutcome {
                errors: vec!["a".to_string(), "b".to_string()],
                created: 0,
            },
        );

        assert_eq!(report.entities_errors, vec!["skipping duplicate id u1".to_string()]);
        assert_eq!(report.items_created, 4);
        assert_eq!(report.total_created(), 5);
        assert_eq!(report.total_errors(), 3);
    }

    #[test]
    fn test_report_json_keys() {
        let json = serde_json::to_value(Report::default()).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "entities_created",
                "entities_errors",
                "items_created",
                "items_errors",
                "records_created",
                "records_errors"
            ]
        );
    }
}
