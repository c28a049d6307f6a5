// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender};

use arrow::datatypes::DataType;
use mysql::consts::ColumnType;
use mysql::prelude::Protocol;
use mysql::{QueryResult, Row, Value};

use crate::memrocks_logging::{debug, warn};
use crate::runtime::cancel::CancelToken;

/// A raw result row as an ordered sequence of column values, sized to the
/// cursor's column count.
pub type ValueRow = Vec<Value>;

/// Caller-supplied mapping from one cursor row to one output value. The
/// mapper only sees the current row; it cannot advance the cursor.
pub type RowMapper<T> = Arc<dyn Fn(&[Value]) -> Result<T, String> + Send + Sync>;

/// Default row mapping: the row's column values, verbatim.
pub fn value_row_mapper() -> RowMapper<ValueRow> {
    Arc::new(|values| Ok(values.to_vec()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CursorState {
    Open,
    Finished,
    Closed,
}

/// Internal seam between the streaming loop and the raw cursor, so the loop
/// can be exercised without a live cluster.
pub(crate) trait RowSource {
    fn column_hints(&self) -> Vec<DataType>;

    fn next_values(&mut self) -> Result<Option<ValueRow>, String>;

    /// Idempotent teardown. Errors are reported to the caller, which logs
    /// them; they are never raised past the streaming loop.
    fn close(&mut self) -> Result<(), String>;
}

/// Wraps a raw forward-only result cursor as a produce-next/finished-flag
/// state machine: Open until the cursor reports exhaustion (Finished), Closed
/// after explicit or cancellation-triggered teardown.
pub(crate) struct RowCursor<'c, 't, 'tc, P: Protocol> {
    result: QueryResult<'c, 't, 'tc, P>,
    hints: Vec<DataType>,
    state: CursorState,
}

impl<'c, 't, 'tc, P: Protocol> RowCursor<'c, 't, 'tc, P> {
    pub(crate) fn new(result: QueryResult<'c, 't, 'tc, P>) -> Self {
        let hints = {
            let columns = result.columns();
            columns
                .as_ref()
                .iter()
                .map(|col| mysql_type_hint(col.column_type()))
                .collect()
        };
        Self {
            result,
            hints,
            state: CursorState::Open,
        }
    }
}

impl<'c, 't, 'tc, P: Protocol> RowSource for RowCursor<'c, 't, 'tc, P> {
    fn column_hints(&self) -> Vec<DataType> {
        self.hints.clone()
    }

    fn next_values(&mut self) -> Result<Option<ValueRow>, String> {
        if self.state != CursorState::Open {
            return Ok(None);
        }
        match self.result.next() {
            None => {
                self.state = CursorState::Finished;
                Ok(None)
            }
            Some(Err(e)) => {
                self.state = CursorState::Finished;
                Err(format!("read row failed: {e}"))
            }
            Some(Ok(row)) => Ok(Some(row_values(&row))),
        }
    }

    fn close(&mut self) -> Result<(), String> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        // Drain whatever the server still has buffered so the connection is
        // left in a clean protocol state before it is dropped.
        let outcome = loop {
            match self.result.next() {
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(format!("drain cursor failed: {e}")),
                None => break Ok(()),
            }
        };
        self.state = CursorState::Closed;
        outcome
    }
}

fn row_values(row: &Row) -> ValueRow {
    (0..row.len())
        .map(|i| row.as_ref(i).cloned().unwrap_or(Value::NULL))
        .collect()
}

pub(crate) enum PartitionEvent<T> {
    Columns(Vec<DataType>),
    Row(Result<T, String>),
}

/// Lazy, finite, non-restartable row sequence for one partition.
///
/// Rows arrive from a dedicated reader thread through a bounded channel; each
/// `next()` pull admits at most one more row into flight. Dropping the
/// sequence disconnects the channel, which the reader observes as its signal
/// to tear down the cursor and connection.
pub struct PartitionRows<T> {
    rx: Option<Receiver<PartitionEvent<T>>>,
    hints: Option<Vec<DataType>>,
    pending_error: Option<String>,
    done: bool,
}

impl<T> PartitionRows<T> {
    pub(crate) fn new(rx: Receiver<PartitionEvent<T>>) -> Self {
        Self {
            rx: Some(rx),
            hints: None,
            pending_error: None,
            done: false,
        }
    }

    /// A sequence that reports a single startup failure; used when the
    /// reader thread could not be spawned.
    pub(crate) fn failed(message: String) -> Self {
        Self {
            rx: None,
            hints: None,
            pending_error: Some(message),
            done: false,
        }
    }

    /// Column type hints from the cursor metadata, available once the reader
    /// has opened the cursor (before the first row arrives).
    pub fn column_hints(&self) -> Option<&[DataType]> {
        self.hints.as_deref()
    }
}

impl<T> Iterator for PartitionRows<T> {
    type Item = Result<T, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(message) = self.pending_error.take() {
            self.done = true;
            return Some(Err(message));
        }
        let rx = self.rx.as_ref()?;
        loop {
            match rx.recv() {
                Err(_) => {
                    self.done = true;
                    return None;
                }
                Ok(PartitionEvent::Columns(hints)) => {
                    self.hints = Some(hints);
                }
                Ok(PartitionEvent::Row(item)) => {
                    if item.is_err() {
                        self.done = true;
                    }
                    return Some(item);
                }
            }
        }
    }
}

/// The streaming loop run by a partition reader: pull rows from the source,
/// map them, hand them to the consumer, then tear the source down exactly
/// once on every exit path (exhaustion, error, cancellation, consumer gone).
pub(crate) fn stream_rows<S: RowSource, T>(
    source: &mut S,
    mapper: &RowMapper<T>,
    tx: &SyncSender<PartitionEvent<T>>,
    cancel: &CancelToken,
    partition: u32,
) {
    if tx
        .send(PartitionEvent::Columns(source.column_hints()))
        .is_ok()
    {
        loop {
            if cancel.is_cancelled() {
                debug!("memsql partition {} scan cancelled", partition);
                break;
            }
            match source.next_values() {
                Ok(None) => break,
                Ok(Some(values)) => {
                    let item = (mapper)(&values);
                    let stop = item.is_err();
                    if tx.send(PartitionEvent::Row(item)).is_err() {
                        // Consumer dropped the sequence; treat like a cancel.
                        break;
                    }
                    if stop {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(PartitionEvent::Row(Err(e)));
                    break;
                }
            }
        }
    }
    if let Err(e) = source.close() {
        warn!("closing memsql partition {} cursor failed: {}", partition, e);
    }
}

fn mysql_type_hint(col_type: ColumnType) -> DataType {
    match col_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => DataType::Int64,
        ColumnType::MYSQL_TYPE_FLOAT
        | ColumnType::MYSQL_TYPE_DOUBLE
        | ColumnType::MYSQL_TYPE_DECIMAL
        | ColumnType::MYSQL_TYPE_NEWDECIMAL => DataType::Float64,
        ColumnType::MYSQL_TYPE_NULL => DataType::Null,
        _ => DataType::Utf8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::sync_channel;

    struct FakeSource {
        rows: VecDeque<Result<Option<ValueRow>, String>>,
        close_calls: Arc<AtomicUsize>,
    }

    impl FakeSource {
        fn with_rows(rows: Vec<ValueRow>) -> (Self, Arc<AtomicUsize>) {
            let items = rows.into_iter().map(|r| Ok(Some(r))).collect();
            let close_calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    rows: items,
                    close_calls: Arc::clone(&close_calls),
                },
                close_calls,
            )
        }

        fn with_items(
            items: Vec<Result<Option<ValueRow>, String>>,
        ) -> (Self, Arc<AtomicUsize>) {
            let close_calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    rows: items.into(),
                    close_calls: Arc::clone(&close_calls),
                },
                close_calls,
            )
        }
    }

    impl RowSource for FakeSource {
        fn column_hints(&self) -> Vec<DataType> {
            vec![DataType::Int64]
        }

        fn next_values(&mut self) -> Result<Option<ValueRow>, String> {
            self.rows.pop_front().unwrap_or(Ok(None))
        }

        fn close(&mut self) -> Result<(), String> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn int_row(v: i64) -> ValueRow {
        vec![Value::Int(v)]
    }

    #[test]
    fn streams_rows_in_cursor_order_then_terminates() {
        let (mut source, close_calls) = FakeSource::with_rows(vec![int_row(1), int_row(2)]);
        let (tx, rx) = sync_channel(8);
        stream_rows(&mut source, &value_row_mapper(), &tx, &CancelToken::new(), 0);
        drop(tx);

        let mut rows = PartitionRows::new(rx);
        assert_eq!(rows.next().expect("row 1").expect("ok"), int_row(1));
        assert_eq!(rows.column_hints(), Some(&[DataType::Int64][..]));
        assert_eq!(rows.next().expect("row 2").expect("ok"), int_row(2));
        assert!(rows.next().is_none(), "sequence terminates out-of-band");
        assert!(rows.next().is_none(), "terminated sequence stays terminated");
        assert_eq!(close_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_stops_streaming_and_closes_once() {
        let (mut source, close_calls) = FakeSource::with_rows(vec![int_row(1), int_row(2)]);
        let (tx, rx) = sync_channel(8);
        let cancel = CancelToken::new();
        cancel.cancel();
        stream_rows(&mut source, &value_row_mapper(), &tx, &cancel, 0);
        drop(tx);

        let mut rows: PartitionRows<ValueRow> = PartitionRows::new(rx);
        assert!(rows.next().is_none(), "no rows after cancellation");
        assert_eq!(close_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_consumer_unblocks_the_reader() {
        let (mut source, close_calls) =
            FakeSource::with_rows((0..64).map(int_row).collect());
        let (tx, rx) = sync_channel(1);
        drop(rx);
        stream_rows(&mut source, &value_row_mapper(), &tx, &CancelToken::new(), 0);
        assert_eq!(close_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cursor_error_is_surfaced_then_terminates() {
        let (mut source, close_calls) = FakeSource::with_items(vec![
            Ok(Some(int_row(1))),
            Err("read row failed: boom".to_string()),
        ]);
        let (tx, rx) = sync_channel(8);
        stream_rows(&mut source, &value_row_mapper(), &tx, &CancelToken::new(), 2);
        drop(tx);

        let mut rows = PartitionRows::new(rx);
        assert!(rows.next().expect("first").is_ok());
        let err = rows.next().expect("second").expect_err("error item");
        assert!(err.contains("boom"), "err={err}");
        assert!(rows.next().is_none());
        assert_eq!(close_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mapper_error_fails_the_partition() {
        let (mut source, close_calls) = FakeSource::with_rows(vec![int_row(1), int_row(2)]);
        let (tx, rx) = sync_channel(8);
        let mapper: RowMapper<i64> =
            Arc::new(|_| Err("row mapper rejected the row".to_string()));
        stream_rows(&mut source, &mapper, &tx, &CancelToken::new(), 0);
        drop(tx);

        let mut rows = PartitionRows::new(rx);
        let err = rows.next().expect("item").expect_err("mapper error");
        assert!(err.contains("row mapper"), "err={err}");
        assert!(rows.next().is_none());
        assert_eq!(close_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn startup_failure_yields_single_error() {
        let mut rows: PartitionRows<ValueRow> =
            PartitionRows::failed("connect failed".to_string());
        let err = rows.next().expect("item").expect_err("startup error");
        assert!(err.contains("connect failed"));
        assert!(rows.next().is_none());
    }
}
