//! Row streams over streamed call bodies.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::call::decode_json_lines;
use crate::error::Result;
use crate::pipeline::{BodyReader, BodyWriter};

/// Rows of a table read, decoded from newline-delimited JSON as body chunks
/// arrive.
pub struct TableReader<T> {
    body: Box<dyn BodyReader>,
    buf: Vec<u8>,
    pending: VecDeque<T>,
    eof: bool,
    rsp_params: Option<serde_json::Value>,
    _row: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TableReader<T> {
    pub(crate) fn new(body: Box<dyn BodyReader>, rsp_params: Option<serde_json::Value>) -> Self {
        TableReader {
            body,
            buf: Vec::new(),
            pending: VecDeque::new(),
            eof: false,
            rsp_params,
            _row: PhantomData,
        }
    }

    /// Response parameters the server sent ahead of the rows.
    pub fn response_parameters(&self) -> Option<&serde_json::Value> {
        self.rsp_params.as_ref()
    }

    /// Next row, `None` once the table is exhausted.
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.eof {
                return Ok(None);
            }

            match self.body.chunk().await? {
                Some(chunk) => {
                    self.buf.extend_from_slice(&chunk);
                    if let Some(end) = self.buf.iter().rposition(|b| *b == b'\n') {
                        let rest = self.buf.split_off(end + 1);
                        let complete = std::mem::replace(&mut self.buf, rest);
                        self.pending.extend(decode_json_lines::<T>(&complete)?);
                    }
                }
                None => {
                    self.eof = true;
                    let rest = std::mem::take(&mut self.buf);
                    self.pending.extend(decode_json_lines::<T>(&rest)?);
                }
            }
        }
    }

    /// Read all remaining rows.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Rows written to a table as newline-delimited JSON.
///
/// Nothing is committed until [`TableWriter::finish`] succeeds; dropping the
/// writer aborts the write.
pub struct TableWriter {
    body: Box<dyn BodyWriter>,
    line: Vec<u8>,
}

impl TableWriter {
    pub(crate) fn new(body: Box<dyn BodyWriter>) -> Self {
        TableWriter { body, line: Vec::new() }
    }

    pub async fn write<T: Serialize + ?Sized>(&mut self, row: &T) -> Result<()> {
        self.line.clear();
        serde_json::to_writer(&mut self.line, row)?;
        self.line.push(b'\n');
        self.body.write(&self.line).await
    }

    /// Complete the write and wait for the server to accept it.
    pub async fn finish(mut self) -> Result<()> {
        self.body.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BufferedReader;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Row {
        a: i64,
    }

    #[tokio::test]
    async fn test_rows_split_across_chunks() {
        let chunks = vec![b"{\"a\":1}\n{\"a\"".to_vec(), b":2}\n\n{\"a\":3}".to_vec()];
        let reader = TableReader::<Row>::new(Box::new(BufferedReader::new(chunks)), None);
        let rows = reader.collect().await.unwrap();
        assert_eq!(rows, vec![Row { a: 1 }, Row { a: 2 }, Row { a: 3 }]);
    }

    #[tokio::test]
    async fn test_malformed_row_is_an_error() {
        let chunks = vec![b"{\"a\":1}\nnot json\n".to_vec()];
        let mut reader = TableReader::<Row>::new(Box::new(BufferedReader::new(chunks)), None);
        assert!(reader.next().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_table() {
        let reader = TableReader::<Row>::new(Box::new(BufferedReader::new(Vec::new())), None);
        assert!(reader.collect().await.unwrap().is_empty());
    }
}
