//! Option structures of the typed operations.
//!
//! The `Default` of every options struct is the server-side default of each
//! parameter: booleans are `false`, optional values are left out of the
//! request.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Cypress node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Master transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of a node created by `create_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    MapNode,
    Table,
    File,
    Document,
    StringNode,
    Int64Node,
    Uint64Node,
    DoubleNode,
    BooleanNode,
    Link,
}

/// Master replica a read is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadKind {
    Leader,
    Follower,
    Cache,
}

/// Atomicity of a dynamic table write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Atomicity {
    Full,
    None,
}

fn serialize_millis<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
        None => serializer.serialize_none(),
    }
}

/// Run the command inside a transaction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TxId>,
    pub ping: bool,
    #[serde(rename = "ping_ancestor_transactions")]
    pub ping_ancestors: bool,
}

/// Fail the command unless the listed transactions are alive.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrerequisiteOptions {
    #[serde(rename = "prerequisite_transaction_ids", skip_serializing_if = "Vec::is_empty")]
    pub transaction_ids: Vec<TxId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateNodeOptions {
    pub recursive: bool,
    pub ignore_existing: bool,
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeExistsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_from: Option<ReadKind>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveNodeOptions {
    pub recursive: bool,
    pub force: bool,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetNodeOptions {
    /// Attributes to return along with the node value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_from: Option<ReadKind>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SetNodeOptions {
    pub recursive: bool,
    pub force: bool,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListNodeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_from: Option<ReadKind>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyNodeOptions {
    pub recursive: bool,
    pub ignore_existing: bool,
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_account: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_expiration_time: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_creation_time: Option<bool>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveNodeOptions {
    pub recursive: bool,
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_account: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_expiration_time: Option<bool>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkNodeOptions {
    pub recursive: bool,
    pub ignore_existing: bool,
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StartTxOptions {
    /// Transaction lease; the server aborts it unless pinged within this time
    #[serde(serialize_with = "serialize_millis", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub sticky: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prerequisite_transaction_ids: Vec<TxId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
    /// Parent transaction
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PingTxOptions {
    #[serde(rename = "ping_ancestor_transactions")]
    pub ping_ancestors: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AbortTxOptions {
    pub sticky: bool,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitTxOptions {
    pub sticky: bool,
    #[serde(flatten)]
    pub prerequisites: Option<PrerequisiteOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InsertRowsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atomicity: Option<Atomicity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_sync_replica: Option<bool>,
    /// Update only the columns present in each row
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<bool>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteRowsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_sync_replica: Option<bool>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LookupRowsOptions {
    /// Return a null row for every missing key instead of skipping it
    pub keep_missing_rows: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_names: Option<Vec<String>>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectRowsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_on_incomplete_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_row_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_row_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadTableOptions {
    pub unordered: bool,
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteTableOptions {
    #[serde(flatten)]
    pub transaction: Option<TransactionOptions>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_keep_optional_values_out() {
        let value = serde_json::to_value(CreateNodeOptions::default()).unwrap();
        assert_eq!(value, json!({"recursive": false, "ignore_existing": false, "force": false}));
    }

    #[test]
    fn test_transaction_options_are_flattened() {
        let options = GetNodeOptions {
            attributes: Some(vec!["type".into()]),
            transaction: Some(TransactionOptions {
                transaction_id: Some(TxId("1-2-3-4".into())),
                ..TransactionOptions::default()
            }),
            ..GetNodeOptions::default()
        };
        let value = serde_json::to_value(options).unwrap();
        assert_eq!(value["transaction_id"], json!("1-2-3-4"));
        assert_eq!(value["attributes"], json!(["type"]));
        assert_eq!(value["ping_ancestor_transactions"], json!(false));
        assert!(value.get("max_size").is_none());
    }

    #[test]
    fn test_start_tx_timeout_in_millis() {
        let options = StartTxOptions {
            timeout: Some(Duration::from_secs(30)),
            prerequisite_transaction_ids: vec![TxId("a".into())],
            ..StartTxOptions::default()
        };
        let value = serde_json::to_value(options).unwrap();
        assert_eq!(value["timeout"], json!(30_000));
        assert_eq!(value["prerequisite_transaction_ids"], json!(["a"]));
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_value(NodeType::MapNode).unwrap(), json!("map_node"));
        assert_eq!(serde_json::to_value(ReadKind::Follower).unwrap(), json!("follower"));
        assert_eq!(serde_json::to_value(Atomicity::None).unwrap(), json!("none"));
    }
}
