//! Transport-agnostic call description.
//!
//! A typed operation is reduced to a [`Call`]: a [`Verb`], a parameter map and
//! an optional body. Transports turn the result back into a [`CallResult`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::wire::{self, NameTable, Row};

/// Call parameters, sent as a JSON object.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Receives the raw response-parameters document of a call before the first
/// body byte is handed out.
pub type RspParamsHandler = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

// ============================================================================
// Verbs
// ============================================================================

/// HTTP method a verb is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

/// Cluster operation identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    CreateNode,
    NodeExists,
    RemoveNode,
    GetNode,
    SetNode,
    ListNode,
    CopyNode,
    MoveNode,
    LinkNode,
    StartTx,
    CommitTx,
    AbortTx,
    PingTx,
    InsertRows,
    DeleteRows,
    LookupRows,
    SelectRows,
    ReadTable,
    WriteTable,
}

impl Verb {
    /// Name used in the request path (`/api/v4/<name>`) and as the RPC method.
    pub fn name(self) -> &'static str {
        match self {
            Verb::CreateNode => "create",
            Verb::NodeExists => "exists",
            Verb::RemoveNode => "remove",
            Verb::GetNode => "get",
            Verb::SetNode => "set",
            Verb::ListNode => "list",
            Verb::CopyNode => "copy",
            Verb::MoveNode => "move",
            Verb::LinkNode => "link",
            Verb::StartTx => "start_transaction",
            Verb::CommitTx => "commit_transaction",
            Verb::AbortTx => "abort_transaction",
            Verb::PingTx => "ping_transaction",
            Verb::InsertRows => "insert_rows",
            Verb::DeleteRows => "delete_rows",
            Verb::LookupRows => "lookup_rows",
            Verb::SelectRows => "select_rows",
            Verb::ReadTable => "read_table",
            Verb::WriteTable => "write_table",
        }
    }

    pub fn http_method(self) -> HttpMethod {
        match self {
            Verb::NodeExists | Verb::GetNode | Verb::ListNode | Verb::ReadTable | Verb::SelectRows => {
                HttpMethod::Get
            }
            Verb::SetNode | Verb::InsertRows | Verb::DeleteRows | Verb::LookupRows | Verb::WriteTable => {
                HttpMethod::Put
            }
            _ => HttpMethod::Post,
        }
    }

    /// Bulk data verbs, routed to heavy proxies.
    pub fn is_heavy(self) -> bool {
        matches!(
            self,
            Verb::ReadTable
                | Verb::WriteTable
                | Verb::InsertRows
                | Verb::DeleteRows
                | Verb::LookupRows
                | Verb::SelectRows
        )
    }

    /// Verbs with side effects that the server deduplicates by mutation id.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Verb::CreateNode
                | Verb::RemoveNode
                | Verb::SetNode
                | Verb::CopyNode
                | Verb::MoveNode
                | Verb::LinkNode
                | Verb::StartTx
                | Verb::CommitTx
                | Verb::AbortTx
        )
    }

    /// Verbs without side effects.
    pub fn is_safe_to_retry(self) -> bool {
        matches!(
            self,
            Verb::NodeExists
                | Verb::GetNode
                | Verb::ListNode
                | Verb::PingTx
                | Verb::LookupRows
                | Verb::SelectRows
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Call
// ============================================================================

/// Rows attached to a call, with the name table they refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Rowset {
    pub names: NameTable,
    pub rows: Vec<Row>,
}

impl Rowset {
    pub fn encode<T: Serialize>(items: &[T]) -> Result<Self> {
        let (names, rows) = wire::encode(items)?;
        Ok(Rowset { names, rows })
    }
}

/// One logical operation as seen by interceptors and transports.
#[derive(Clone)]
pub struct Call {
    pub verb: Verb,
    pub params: Params,
    /// Raw request body
    pub payload: Option<Vec<u8>>,
    /// Encoded rows sent with the request
    pub rowset: Option<Rowset>,
    /// Correlation id, one per logical call
    pub call_id: Uuid,
    /// Set by the mutation retrier and kept across attempts
    pub mutation_id: Option<Uuid>,
    /// Whether this attempt replays an earlier one
    pub retry: bool,
    /// Send to this proxy instead of selecting one
    pub proxy: Option<String>,
    /// Proxy the latest attempt was sent to
    pub selected_proxy: Option<String>,
    on_rsp_params: Option<RspParamsHandler>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("verb", &self.verb)
            .field("params", &self.params)
            .field("call_id", &self.call_id)
            .field("mutation_id", &self.mutation_id)
            .field("retry", &self.retry)
            .field("proxy", &self.proxy)
            .field("selected_proxy", &self.selected_proxy)
            .finish_non_exhaustive()
    }
}

impl Call {
    pub fn new(verb: Verb, params: Params) -> Self {
        Call {
            verb,
            params,
            payload: None,
            rowset: None,
            call_id: Uuid::new_v4(),
            mutation_id: None,
            retry: false,
            proxy: None,
            selected_proxy: None,
            on_rsp_params: None,
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_rowset(mut self, rowset: Rowset) -> Self {
        self.rowset = Some(rowset);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Register the response-parameters handler.
    ///
    /// # Panics
    ///
    /// Panics if a handler is already registered: two consumers of the same
    /// response parameters is a bug at the call site.
    pub fn set_rsp_params_handler(&mut self, handler: RspParamsHandler) {
        if self.on_rsp_params.is_some() {
            panic!("response parameters handler is already set for {} call", self.verb);
        }
        self.on_rsp_params = Some(handler);
    }

    pub fn has_rsp_params_handler(&self) -> bool {
        self.on_rsp_params.is_some()
    }

    /// Hand the response parameters to the registered handler, if any.
    pub fn deliver_rsp_params(&self, raw: &[u8]) -> Result<()> {
        match &self.on_rsp_params {
            Some(handler) => handler(raw),
            None => Ok(()),
        }
    }

    /// Parameters as sent on the wire: `params` plus the mutation id and
    /// retry flag when set.
    pub fn wire_params(&self) -> Params {
        let mut params = self.params.clone();
        if let Some(id) = self.mutation_id {
            params.insert("mutation_id".to_string(), serde_json::Value::String(id.to_string()));
            params.insert("retry".to_string(), serde_json::Value::Bool(self.retry));
        }
        params
    }
}

// ============================================================================
// Result
// ============================================================================

/// Successful response of a unary call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
    /// Response body (JSON)
    pub payload: Vec<u8>,
    /// Extra binary parts (RPC rowsets)
    pub attachments: Vec<Vec<u8>>,
}

impl CallResult {
    pub fn from_payload(payload: Vec<u8>) -> Self {
        CallResult {
            payload,
            attachments: Vec::new(),
        }
    }

    /// Decode the whole payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decode the `value` entry of the payload object.
    pub fn decode_value<T: DeserializeOwned>(&self) -> Result<T> {
        self.decode_single("value")
    }

    /// Decode one entry of the payload object.
    pub fn decode_single<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let mut object: Params = serde_json::from_slice(&self.payload)?;
        let value = object
            .remove(key)
            .ok_or_else(|| Error::Protocol(format!("response has no {key:?} entry")))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decode result rows: the first attachment when it holds a binary
    /// rowset, otherwise newline-delimited JSON in the payload.
    pub fn decode_rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if let Some(rowset) = self.attachments.first() {
            let (names, rows) = wire::read_rowset(rowset)?;
            return wire::rows_to_json(&names, &rows)?
                .into_iter()
                .map(|row| serde_json::from_value(row).map_err(Error::from))
                .collect();
        }
        decode_json_lines(&self.payload)
    }
}

/// Parse newline-delimited JSON documents, skipping blank lines.
pub(crate) fn decode_json_lines<T: DeserializeOwned>(buf: &[u8]) -> Result<Vec<T>> {
    buf.split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(|line| serde_json::from_slice(line).map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_verb_properties() {
        assert_eq!(Verb::CreateNode.name(), "create");
        assert_eq!(Verb::CreateNode.http_method(), HttpMethod::Post);
        assert!(Verb::CreateNode.is_mutating());
        assert!(!Verb::CreateNode.is_safe_to_retry());

        assert_eq!(Verb::GetNode.http_method(), HttpMethod::Get);
        assert!(Verb::GetNode.is_safe_to_retry());
        assert!(!Verb::GetNode.is_heavy());

        assert!(Verb::ReadTable.is_heavy());
        assert!(!Verb::InsertRows.is_mutating());
        assert!(!Verb::InsertRows.is_safe_to_retry());
    }

    #[test]
    fn test_no_verb_is_both_mutating_and_safe() {
        let verbs = [
            Verb::CreateNode,
            Verb::NodeExists,
            Verb::RemoveNode,
            Verb::GetNode,
            Verb::SetNode,
            Verb::ListNode,
            Verb::CopyNode,
            Verb::MoveNode,
            Verb::LinkNode,
            Verb::StartTx,
            Verb::CommitTx,
            Verb::AbortTx,
            Verb::PingTx,
            Verb::InsertRows,
            Verb::DeleteRows,
            Verb::LookupRows,
            Verb::SelectRows,
            Verb::ReadTable,
            Verb::WriteTable,
        ];
        for verb in verbs {
            assert!(!(verb.is_mutating() && verb.is_safe_to_retry()), "{verb}");
        }
    }

    #[test]
    fn test_wire_params_include_mutation_id() {
        let mut params = Params::new();
        params.insert("path".into(), "//tmp/a".into());
        let mut call = Call::new(Verb::SetNode, params);
        assert!(!call.wire_params().contains_key("mutation_id"));

        let id = Uuid::new_v4();
        call.mutation_id = Some(id);
        call.retry = true;
        let wire = call.wire_params();
        assert_eq!(wire["mutation_id"], serde_json::json!(id.to_string()));
        assert_eq!(wire["retry"], serde_json::json!(true));
        assert_eq!(wire["path"], serde_json::json!("//tmp/a"));
    }

    #[test]
    #[should_panic(expected = "response parameters handler is already set")]
    fn test_second_rsp_params_handler_panics() {
        let mut call = Call::new(Verb::ReadTable, Params::new());
        call.set_rsp_params_handler(Arc::new(|_| Ok(())));
        call.set_rsp_params_handler(Arc::new(|_| Ok(())));
    }

    #[test]
    fn test_decode_single() {
        let res = CallResult::from_payload(br#"{"node_id":"1-2-3-4"}"#.to_vec());
        let id: String = res.decode_single("node_id").unwrap();
        assert_eq!(id, "1-2-3-4");
        assert!(matches!(res.decode_single::<String>("value"), Err(Error::Protocol(_))));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct KeyValue {
        key: i64,
        value: String,
    }

    #[test]
    fn test_decode_rows_from_json_lines() {
        let res = CallResult::from_payload(b"{\"key\":1,\"value\":\"a\"}\n\n{\"key\":2,\"value\":\"b\"}\n".to_vec());
        let rows: Vec<KeyValue> = res.decode_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, "b");
    }

    #[test]
    fn test_decode_rows_from_rowset_attachment() {
        #[derive(Serialize)]
        struct Out {
            key: i64,
            value: String,
        }
        let rowset = Rowset::encode(&[Out {
            key: 7,
            value: "x".into(),
        }])
        .unwrap();
        let res = CallResult {
            payload: Vec::new(),
            attachments: vec![wire::write_rowset(&rowset.names, &rowset.rows)],
        };
        let rows: Vec<KeyValue> = res.decode_rows().unwrap();
        assert_eq!(rows, vec![KeyValue { key: 7, value: "x".into() }]);
    }
}
