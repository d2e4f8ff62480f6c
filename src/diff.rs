//! Template diff engine
//!
//! Compares two snapshots of declared resources by logical id. Only top-level
//! property keys are compared; nested values are compared for deep equality
//! as a whole.

use crate::error::{CostError, Result};
use crate::model::{ChangeType, PropertyChange, Resource, ResourceDiff};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Which snapshot a resource came from
pub const OLD_SNAPSHOT: &str = "old";
pub const NEW_SNAPSHOT: &str = "new";

/// Counts per change type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
}

impl DiffSummary {
    pub fn has_changes(&self) -> bool {
        self.added + self.removed + self.modified > 0
    }
}

/// Index a snapshot by logical id, rejecting duplicates
pub(crate) fn index_by_id<'a>(
    resources: &'a [Resource],
    snapshot: &str,
) -> Result<HashMap<&'a str, &'a Resource>> {
    let mut index = HashMap::with_capacity(resources.len());
    for resource in resources {
        if index.insert(resource.logical_id.as_str(), resource).is_some() {
            return Err(CostError::DuplicateLogicalId {
                logical_id: resource.logical_id.clone(),
                snapshot: snapshot.to_string(),
            });
        }
    }
    Ok(index)
}

/// Diff two snapshots
///
/// Unchanged resources are omitted. Added and removed resources carry their
/// whole property payload, with the absent side `None`. Output is sorted by
/// logical id.
pub fn diff(old: &[Resource], new: &[Resource]) -> Result<Vec<ResourceDiff>> {
    let old_index = index_by_id(old, OLD_SNAPSHOT)?;
    let new_index = index_by_id(new, NEW_SNAPSHOT)?;

    let mut diffs = Vec::new();

    for (id, old_res) in &old_index {
        match new_index.get(id) {
            None => diffs.push(one_sided(old_res, ChangeType::Removed)),
            Some(new_res) => {
                let changes = property_changes(old_res, new_res);
                if !changes.is_empty() || old_res.resource_type != new_res.resource_type {
                    diffs.push(ResourceDiff {
                        logical_id: new_res.logical_id.clone(),
                        resource_type: new_res.resource_type.clone(),
                        change_type: ChangeType::Modified,
                        property_changes: changes,
                    });
                }
            }
        }
    }

    for (id, new_res) in &new_index {
        if !old_index.contains_key(id) {
            diffs.push(one_sided(new_res, ChangeType::Added));
        }
    }

    diffs.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
    Ok(diffs)
}

/// Count the change types between two snapshots, unchanged included
pub fn summarize(old: &[Resource], diffs: &[ResourceDiff]) -> DiffSummary {
    summary_for(old.len(), diffs)
}

pub(crate) fn summary_for(old_count: usize, diffs: &[ResourceDiff]) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for d in diffs {
        match d.change_type {
            ChangeType::Added => summary.added += 1,
            ChangeType::Removed => summary.removed += 1,
            ChangeType::Modified => summary.modified += 1,
            ChangeType::Unchanged => summary.unchanged += 1,
        }
    }
    // Every old resource that is neither removed nor modified is unchanged
    summary.unchanged += old_count.saturating_sub(summary.removed + summary.modified);
    summary
}

fn one_sided(resource: &Resource, change_type: ChangeType) -> ResourceDiff {
    let property_changes = resource
        .properties
        .iter()
        .map(|(key, value)| {
            let change = match change_type {
                ChangeType::Removed => PropertyChange {
                    old: Some(value.clone()),
                    new: None,
                },
                _ => PropertyChange {
                    old: None,
                    new: Some(value.clone()),
                },
            };
            (key.clone(), change)
        })
        .collect();

    ResourceDiff {
        logical_id: resource.logical_id.clone(),
        resource_type: resource.resource_type.clone(),
        change_type,
        property_changes,
    }
}

fn property_changes(old: &Resource, new: &Resource) -> BTreeMap<String, PropertyChange> {
    let mut changes = BTreeMap::new();

    for (key, old_value) in &old.properties {
        match new.properties.get(key) {
            Some(new_value) if new_value == old_value => {}
            new_value => {
                changes.insert(
                    key.clone(),
                    PropertyChange {
                        old: Some(old_value.clone()),
                        new: new_value.cloned(),
                    },
                );
            }
        }
    }

    for (key, new_value) in &new.properties {
        if !old.properties.contains_key(key) {
            changes.insert(
                key.clone(),
                PropertyChange {
                    old: None,
                    new: Some(new_value.clone()),
                },
            );
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn res(id: &str, resource_type: &str, props: Value) -> Resource {
        Resource::new(id, resource_type, props.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_modified_and_added_scenario() {
        let old = vec![res("A", "AWS::SQS::Queue", json!({ "x": 1 }))];
        let new = vec![
            res("B", "AWS::SQS::Queue", json!({ "y": 1 })),
            res("A", "AWS::SQS::Queue", json!({ "x": 2 })),
        ];

        let diffs = diff(&old, &new).unwrap();
        assert_eq!(diffs.len(), 2);

        assert_eq!(diffs[0].logical_id, "A");
        assert_eq!(diffs[0].change_type, ChangeType::Modified);
        assert_eq!(
            diffs[0].property_changes["x"],
            PropertyChange {
                old: Some(json!(1)),
                new: Some(json!(2))
            }
        );

        assert_eq!(diffs[1].logical_id, "B");
        assert_eq!(diffs[1].change_type, ChangeType::Added);
        assert_eq!(
            diffs[1].property_changes["y"],
            PropertyChange {
                old: None,
                new: Some(json!(1))
            }
        );
    }

    #[test]
    fn test_identical_snapshots_have_no_diff() {
        let snapshot = vec![
            res("A", "AWS::S3::Bucket", json!({ "Tags": [{ "Key": "env", "Value": "dev" }] })),
            res("B", "AWS::IAM::Role", json!({})),
        ];
        assert!(diff(&snapshot, &snapshot).unwrap().is_empty());
    }

    #[test]
    fn test_removed_carries_old_payload() {
        let old = vec![res("Gone", "AWS::SNS::Topic", json!({ "TopicName": "alerts" }))];
        let diffs = diff(&old, &[]).unwrap();
        assert_eq!(diffs[0].change_type, ChangeType::Removed);
        assert_eq!(diffs[0].property_changes["TopicName"].old, Some(json!("alerts")));
        assert_eq!(diffs[0].property_changes["TopicName"].new, None);
    }

    #[test]
    fn test_removed_key_is_a_change() {
        let old = vec![res("A", "AWS::Lambda::Function", json!({ "Timeout": 3, "MemorySize": 128 }))];
        let new = vec![res("A", "AWS::Lambda::Function", json!({ "MemorySize": 128 }))];
        let diffs = diff(&old, &new).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].property_changes.len(), 1);
        assert_eq!(diffs[0].property_changes["Timeout"].new, None);
    }

    #[test]
    fn test_nested_change_reported_at_top_level_key() {
        let old = vec![res("T", "AWS::DynamoDB::Table", json!({ "ProvisionedThroughput": { "ReadCapacityUnits": 5 } }))];
        let new = vec![res("T", "AWS::DynamoDB::Table", json!({ "ProvisionedThroughput": { "ReadCapacityUnits": 10 } }))];
        let diffs = diff(&old, &new).unwrap();
        assert!(diffs[0].property_changes.contains_key("ProvisionedThroughput"));
    }

    #[test]
    fn test_type_change_uses_new_type() {
        let old = vec![res("Db", "AWS::RDS::DBInstance", json!({}))];
        let new = vec![res("Db", "AWS::RDS::DBCluster", json!({}))];
        let diffs = diff(&old, &new).unwrap();
        assert_eq!(diffs[0].change_type, ChangeType::Modified);
        assert_eq!(diffs[0].resource_type, "AWS::RDS::DBCluster");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dup = vec![
            res("A", "AWS::SQS::Queue", json!({})),
            res("A", "AWS::SNS::Topic", json!({})),
        ];
        let err = diff(&[], &dup).unwrap_err();
        match err {
            CostError::DuplicateLogicalId { logical_id, snapshot } => {
                assert_eq!(logical_id, "A");
                assert_eq!(snapshot, NEW_SNAPSHOT);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_summarize_counts_unchanged() {
        let old = vec![
            res("A", "AWS::SQS::Queue", json!({ "x": 1 })),
            res("B", "AWS::SQS::Queue", json!({})),
            res("C", "AWS::SQS::Queue", json!({})),
        ];
        let new = vec![
            res("A", "AWS::SQS::Queue", json!({ "x": 2 })),
            res("B", "AWS::SQS::Queue", json!({})),
            res("D", "AWS::SQS::Queue", json!({})),
        ];
        let diffs = diff(&old, &new).unwrap();
        let summary = summarize(&old, &diffs);
        assert_eq!(
            summary,
            DiffSummary {
                added: 1,
                removed: 1,
                modified: 1,
                unchanged: 1
            }
        );
        assert!(summary.has_changes());
        assert!(!summarize(&[], &[]).has_changes());
    }
}
