//! Typed API
//!
//! [`CallEncoder`] reduces every cluster operation to one [`Call`] run
//! through the client pipeline (or one streamed read or write), and decodes
//! the result:
//!
//! | Operation | Verb | Result |
//! |---|---|---|
//! | `create_node`, `copy_node`, `move_node`, `link_node` | mutating | `node_id` entry |
//! | `node_exists`, `get_node`, `list_node` | read | `value` entry |
//! | `remove_node`, `set_node` | mutating | none |
//! | `start_tx` | mutating | `transaction_id` entry |
//! | `commit_tx`, `abort_tx` | mutating | none |
//! | `ping_tx` | read | none |
//! | `insert_rows`, `delete_rows` | heavy | none |
//! | `lookup_rows`, `select_rows` | heavy, read | rows |
//! | `read_table`, `write_table` | heavy, streamed | [`TableReader`], [`TableWriter`] |

mod options;
mod table;

pub use options::*;
pub use table::{TableReader, TableWriter};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::call::{Call, CallResult, Params, Rowset, Verb};
use crate::context::{Context, StopGroup};
use crate::error::{Error, Result};
use crate::pipeline::{BodyReader, BodyWriter, Pipeline};

/// Merge `options` into the required parameters of a call.
fn params<O: Serialize>(mut base: Params, options: &O) -> Result<Params> {
    match serde_json::to_value(options)? {
        serde_json::Value::Object(extra) => {
            base.extend(extra);
            Ok(base)
        }
        serde_json::Value::Null => Ok(base),
        other => Err(Error::Protocol(format!("options must serialize to an object, got {other}"))),
    }
}

fn path_params(key: &str, path: &str) -> Params {
    let mut params = Params::new();
    params.insert(key.to_string(), path.into());
    params
}

/// Typed operations on top of a call pipeline.
#[derive(Debug, Clone)]
pub struct CallEncoder {
    pipeline: Arc<Pipeline>,
    stop: StopGroup,
}

impl CallEncoder {
    pub fn new(pipeline: Arc<Pipeline>, stop: StopGroup) -> Self {
        CallEncoder { pipeline, stop }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run a unary call. Calls are admitted only while the client runs and
    /// are cancelled when it stops.
    pub async fn invoke(&self, ctx: &Context, mut call: Call) -> Result<CallResult> {
        let _guard = self.stop.try_add().ok_or(Error::ClientStopped)?;
        let ctx = ctx.merge(self.stop.context());
        self.pipeline.invoke(&ctx, &mut call).await
    }

    pub async fn invoke_read(&self, ctx: &Context, mut call: Call) -> Result<Box<dyn BodyReader>> {
        let _guard = self.stop.try_add().ok_or(Error::ClientStopped)?;
        let ctx = ctx.merge(self.stop.context());
        self.pipeline.invoke_read(&ctx, &mut call).await
    }

    pub async fn invoke_write(&self, ctx: &Context, mut call: Call) -> Result<Box<dyn BodyWriter>> {
        let _guard = self.stop.try_add().ok_or(Error::ClientStopped)?;
        let ctx = ctx.merge(self.stop.context());
        self.pipeline.invoke_write(&ctx, &mut call).await
    }

    // ------------------------------------------------------------------------
    // Cypress
    // ------------------------------------------------------------------------

    pub async fn create_node(
        &self,
        ctx: &Context,
        path: &str,
        node_type: NodeType,
        options: &CreateNodeOptions,
    ) -> Result<NodeId> {
        let mut base = path_params("path", path);
        base.insert("type".to_string(), serde_json::to_value(node_type)?);
        let call = Call::new(Verb::CreateNode, params(base, options)?);
        self.invoke(ctx, call).await?.decode_single("node_id")
    }

    pub async fn node_exists(&self, ctx: &Context, path: &str, options: &NodeExistsOptions) -> Result<bool> {
        let call = Call::new(Verb::NodeExists, params(path_params("path", path), options)?);
        self.invoke(ctx, call).await?.decode_value()
    }

    pub async fn remove_node(&self, ctx: &Context, path: &str, options: &RemoveNodeOptions) -> Result<()> {
        let call = Call::new(Verb::RemoveNode, params(path_params("path", path), options)?);
        self.invoke(ctx, call).await.map(|_| ())
    }

    pub async fn get_node<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        path: &str,
        options: &GetNodeOptions,
    ) -> Result<T> {
        let call = Call::new(Verb::GetNode, params(path_params("path", path), options)?);
        self.invoke(ctx, call).await?.decode_value()
    }

    /// Replace the node at `path` with `value`, sent as the request body.
    pub async fn set_node<T: Serialize + ?Sized>(
        &self,
        ctx: &Context,
        path: &str,
        value: &T,
        options: &SetNodeOptions,
    ) -> Result<()> {
        let call = Call::new(Verb::SetNode, params(path_params("path", path), options)?)
            .with_payload(serde_json::to_vec(value)?);
        self.invoke(ctx, call).await.map(|_| ())
    }

    pub async fn list_node<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        path: &str,
        options: &ListNodeOptions,
    ) -> Result<T> {
        let call = Call::new(Verb::ListNode, params(path_params("path", path), options)?);
        self.invoke(ctx, call).await?.decode_value()
    }

    pub async fn copy_node(
        &self,
        ctx: &Context,
        src: &str,
        dst: &str,
        options: &CopyNodeOptions,
    ) -> Result<NodeId> {
        let mut base = path_params("source_path", src);
        base.insert("destination_path".to_string(), dst.into());
        let call = Call::new(Verb::CopyNode, params(base, options)?);
        self.invoke(ctx, call).await?.decode_single("node_id")
    }

    pub async fn move_node(
        &self,
        ctx: &Context,
        src: &str,
        dst: &str,
        options: &MoveNodeOptions,
    ) -> Result<NodeId> {
        let mut base = path_params("source_path", src);
        base.insert("destination_path".to_string(), dst.into());
        let call = Call::new(Verb::MoveNode, params(base, options)?);
        self.invoke(ctx, call).await?.decode_single("node_id")
    }

    /// Create a symbolic link at `link` pointing to `target`.
    pub async fn link_node(
        &self,
        ctx: &Context,
        target: &str,
        link: &str,
        options: &LinkNodeOptions,
    ) -> Result<NodeId> {
        let mut base = path_params("target_path", target);
        base.insert("link_path".to_string(), link.into());
        let call = Call::new(Verb::LinkNode, params(base, options)?);
        self.invoke(ctx, call).await?.decode_single("node_id")
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    pub async fn start_tx(&self, ctx: &Context, options: &StartTxOptions) -> Result<TxId> {
        let call = Call::new(Verb::StartTx, params(Params::new(), options)?);
        self.invoke(ctx, call).await?.decode_single("transaction_id")
    }

    pub async fn ping_tx(&self, ctx: &Context, id: &TxId, options: &PingTxOptions) -> Result<()> {
        let call = Call::new(Verb::PingTx, params(path_params("transaction_id", &id.0), options)?);
        self.invoke(ctx, call).await.map(|_| ())
    }

    pub async fn abort_tx(&self, ctx: &Context, id: &TxId, options: &AbortTxOptions) -> Result<()> {
        let call = Call::new(Verb::AbortTx, params(path_params("transaction_id", &id.0), options)?);
        self.invoke(ctx, call).await.map(|_| ())
    }

    pub async fn commit_tx(&self, ctx: &Context, id: &TxId, options: &CommitTxOptions) -> Result<()> {
        let call = Call::new(Verb::CommitTx, params(path_params("transaction_id", &id.0), options)?);
        self.invoke(ctx, call).await.map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Dynamic tables
    // ------------------------------------------------------------------------

    pub async fn insert_rows<T: Serialize>(
        &self,
        ctx: &Context,
        path: &str,
        rows: &[T],
        options: &InsertRowsOptions,
    ) -> Result<()> {
        let call = Call::new(Verb::InsertRows, params(path_params("path", path), options)?)
            .with_rowset(Rowset::encode(rows)?);
        self.invoke(ctx, call).await.map(|_| ())
    }

    pub async fn delete_rows<K: Serialize>(
        &self,
        ctx: &Context,
        path: &str,
        keys: &[K],
        options: &DeleteRowsOptions,
    ) -> Result<()> {
        let call = Call::new(Verb::DeleteRows, params(path_params("path", path), options)?)
            .with_rowset(Rowset::encode(keys)?);
        self.invoke(ctx, call).await.map(|_| ())
    }

    pub async fn lookup_rows<K: Serialize, T: DeserializeOwned>(
        &self,
        ctx: &Context,
        path: &str,
        keys: &[K],
        options: &LookupRowsOptions,
    ) -> Result<Vec<T>> {
        let call = Call::new(Verb::LookupRows, params(path_params("path", path), options)?)
            .with_rowset(Rowset::encode(keys)?);
        self.invoke(ctx, call).await?.decode_rows()
    }

    pub async fn select_rows<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        query: &str,
        options: &SelectRowsOptions,
    ) -> Result<Vec<T>> {
        let call = Call::new(Verb::SelectRows, params(path_params("query", query), options)?);
        self.invoke(ctx, call).await?.decode_rows()
    }

    // ------------------------------------------------------------------------
    // Static tables
    // ------------------------------------------------------------------------

    pub async fn read_table<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        path: &str,
        options: &ReadTableOptions,
    ) -> Result<TableReader<T>> {
        let mut call = Call::new(Verb::ReadTable, params(path_params("path", path), options)?);

        let rsp_params = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&rsp_params);
        call.set_rsp_params_handler(Arc::new(move |raw: &[u8]| -> Result<()> {
            *sink.lock() = Some(serde_json::from_slice::<serde_json::Value>(raw)?);
            Ok(())
        }));

        let body = self.invoke_read(ctx, call).await?;
        let rsp_params = rsp_params.lock().take();
        Ok(TableReader::new(body, rsp_params))
    }

    pub async fn write_table(&self, ctx: &Context, path: &str, options: &WriteTableOptions) -> Result<TableWriter> {
        let call = Call::new(Verb::WriteTable, params(path_params("path", path), options)?);
        Ok(TableWriter::new(self.invoke_write(ctx, call).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BufferedReader, Transport};
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers every call with a canned payload and records the last call.
    struct Canned {
        payload: Vec<u8>,
        last: Mutex<Option<Call>>,
    }

    impl Canned {
        fn new(payload: serde_json::Value) -> Arc<Self> {
            Arc::new(Canned {
                payload: serde_json::to_vec(&payload).unwrap(),
                last: Mutex::new(None),
            })
        }

        fn last_params(&self) -> Params {
            self.last.lock().as_ref().unwrap().params.clone()
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn invoke(&self, _ctx: &Context, call: &mut Call) -> Result<CallResult> {
            *self.last.lock() = Some(call.clone());
            Ok(CallResult::from_payload(self.payload.clone()))
        }

        async fn invoke_read(&self, _ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyReader>> {
            call.deliver_rsp_params(br#"{"start_row_index":0}"#)?;
            Ok(Box::new(BufferedReader::new(vec![self.payload.clone(), b"\n".to_vec()])))
        }

        async fn invoke_write(&self, _ctx: &Context, _call: &mut Call) -> Result<Box<dyn BodyWriter>> {
            Err(Error::Protocol("unused".into()))
        }
    }

    fn encoder(transport: Arc<Canned>) -> CallEncoder {
        CallEncoder::new(Arc::new(Pipeline::new(transport)), StopGroup::new())
    }

    #[tokio::test]
    async fn test_create_node_params_and_result() {
        let transport = Canned::new(json!({"node_id": "1-2-3-4"}));
        let yc = encoder(Arc::clone(&transport));

        let options = CreateNodeOptions {
            recursive: true,
            ..CreateNodeOptions::default()
        };
        let id = yc
            .create_node(&Context::background(), "//tmp/t", NodeType::Table, &options)
            .await
            .unwrap();
        assert_eq!(id, NodeId("1-2-3-4".into()));

        let params = transport.last_params();
        assert_eq!(params["path"], json!("//tmp/t"));
        assert_eq!(params["type"], json!("table"));
        assert_eq!(params["recursive"], json!(true));
    }

    #[tokio::test]
    async fn test_get_node_decodes_value() {
        let transport = Canned::new(json!({"value": {"a": 1}}));
        let yc = encoder(transport);
        let value: serde_json::Value = yc
            .get_node(&Context::background(), "//tmp/doc", &GetNodeOptions::default())
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_set_node_sends_value_as_payload() {
        let transport = Canned::new(json!({}));
        let yc = encoder(Arc::clone(&transport));
        yc.set_node(&Context::background(), "//tmp/doc", &vec![1, 2], &SetNodeOptions::default())
            .await
            .unwrap();
        let last = transport.last.lock().clone().unwrap();
        assert_eq!(last.verb, Verb::SetNode);
        assert_eq!(last.payload.as_deref(), Some(b"[1,2]".as_slice()));
    }

    #[tokio::test]
    async fn test_missing_result_entry_is_protocol_error() {
        let yc = encoder(Canned::new(json!({})));
        let err = yc.start_tx(&Context::background(), &StartTxOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_table_captures_response_parameters() {
        let yc = encoder(Canned::new(json!({"a": 1})));
        let reader = yc
            .read_table::<serde_json::Value>(&Context::background(), "//tmp/t", &ReadTableOptions::default())
            .await
            .unwrap();
        assert_eq!(reader.response_parameters(), Some(&json!({"start_row_index": 0})));
        assert_eq!(reader.collect().await.unwrap(), vec![json!({"a": 1})]);
    }

    #[tokio::test]
    async fn test_calls_rejected_after_stop() {
        let stop = StopGroup::new();
        let yc = CallEncoder::new(Arc::new(Pipeline::new(Canned::new(json!({})))), stop.clone());
        stop.stop().await;
        let err = yc
            .remove_node(&Context::background(), "//tmp/t", &RemoveNodeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ClientStopped));
    }
}
