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
use std::sync::mpsc::{self, SyncSender};
use std::thread;

use arrow::array::{
    ArrayRef, Float64Builder, Int64Builder, NullArray, RecordBatch, RecordBatchOptions,
    StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use mysql::prelude::Queryable;
use mysql::{Params, Value};

use crate::common::ids::SlotId;
use crate::exec::chunk::{Chunk, field_with_slot_id};
use crate::exec::node::{BoxedExecIter, ExecResult};
use crate::exec::node::scan::{ScanMorsel, ScanMorsels, ScanOp};
use crate::memrocks_logging::{debug, info};
use crate::runtime::cancel::CancelToken;

use super::conn::MemSqlConnInfo;
use super::cursor::{
    PartitionEvent, PartitionRows, RowCursor, RowMapper, ValueRow, stream_rows, value_row_mapper,
};
use super::plan::{PartitionDescriptor, QueryPlan, plan_query};
use super::rewrite::fragment_query;

const ROW_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_SCAN_BATCH_SIZE: usize = 4096;

/// The caller's query: SQL text, positional parameters, and the mapping from
/// one cursor row to one output value. Immutable once supplied.
#[derive(Clone)]
pub struct QuerySpec<T> {
    pub sql: String,
    pub params: Vec<Value>,
    pub mapper: RowMapper<T>,
}

impl QuerySpec<ValueRow> {
    pub fn value_rows(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            mapper: value_row_mapper(),
        }
    }
}

/// Execute one partition of a planned query, producing rows lazily in cursor
/// order. Each invocation opens its own exclusively-owned connection; the
/// sequence is finite and not restartable.
pub fn execute_partition<T: Send + 'static>(
    info: &MemSqlConnInfo,
    plan: &QueryPlan,
    spec: &QuerySpec<T>,
    descriptor: &PartitionDescriptor,
    cancel: CancelToken,
) -> PartitionRows<T> {
    let target = if plan.per_partition_sql {
        info.with_endpoint(&descriptor.host, descriptor.port)
            .with_database(format!("{}_{}", info.database, descriptor.index))
    } else {
        info.with_endpoint(&descriptor.host, descriptor.port)
    };
    let sql = fragment_query(plan, &info.database, &spec.sql, descriptor.index);
    // Per-partition fragments keep the literal parameter values captured by
    // the extended explain output; only the fallback path re-binds.
    let params = if plan.per_partition_sql {
        None
    } else {
        Some(spec.params.clone())
    };

    let mapper = Arc::clone(&spec.mapper);
    let partition = descriptor.index;
    let (tx, rx) = mpsc::sync_channel(ROW_CHANNEL_CAPACITY);
    let spawned = thread::Builder::new()
        .name(format!("memsql-scan-{partition}"))
        .spawn(move || run_partition_reader(target, sql, params, mapper, tx, cancel, partition));
    match spawned {
        Ok(_) => PartitionRows::new(rx),
        Err(e) => PartitionRows::failed(format!("spawn partition {partition} reader failed: {e}")),
    }
}

/// Reader thread body: owns the partition's connection and cursor for their
/// whole lifetime and releases both on every exit path.
fn run_partition_reader<T>(
    info: MemSqlConnInfo,
    sql: String,
    params: Option<Vec<Value>>,
    mapper: RowMapper<T>,
    tx: SyncSender<PartitionEvent<T>>,
    cancel: CancelToken,
    partition: u32,
) {
    let mut conn = match info.open() {
        Ok(conn) => conn,
        Err(e) => {
            let _ = tx.send(PartitionEvent::Row(Err(e)));
            return;
        }
    };
    match params {
        // Fallback path: forward-only prepared statement with positional
        // binding; NULL binds as the generic null marker.
        Some(params) => match conn.exec_iter(sql.as_str(), Params::from(params)) {
            Ok(result) => {
                let mut cursor = RowCursor::new(result);
                stream_rows(&mut cursor, &mapper, &tx, &cancel, partition);
            }
            Err(e) => {
                let _ = tx.send(PartitionEvent::Row(Err(format!(
                    "execute partition {partition} query failed: {e}"
                ))));
            }
        },
        None => match conn.query_iter(sql.as_str()) {
            Ok(result) => {
                let mut cursor = RowCursor::new(result);
                stream_rows(&mut cursor, &mapper, &tx, &cancel, partition);
            }
            Err(e) => {
                let _ = tx.send(PartitionEvent::Row(Err(format!(
                    "execute partition {partition} query failed: {e}"
                ))));
            }
        },
    }
    drop(conn);
    debug!("memsql partition {} connection released", partition);
}

#[derive(Clone, Debug)]
pub struct MemSqlScanConfig {
    pub conn: MemSqlConnInfo,
    pub sql: String,
    pub params: Vec<Value>,
    pub slot_ids: Vec<SlotId>,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
}

pub struct MemSqlScanOp {
    cfg: MemSqlScanConfig,
    plan: Arc<QueryPlan>,
}

impl MemSqlScanOp {
    /// Plans the query against the cluster exactly once, on the coordinating
    /// side, before any morsel is handed out.
    pub fn new(cfg: MemSqlScanConfig) -> Result<Self, String> {
        let plan = plan_query(&cfg.conn, &cfg.sql, &cfg.params)?;
        Ok(Self::with_plan(cfg, Arc::new(plan)))
    }

    /// Attach a previously computed plan, e.g. when the driver planned ahead
    /// of building the scan node.
    pub fn with_plan(cfg: MemSqlScanConfig, plan: Arc<QueryPlan>) -> Self {
        Self { cfg, plan }
    }

    pub fn plan(&self) -> &Arc<QueryPlan> {
        &self.plan
    }
}

impl ScanOp for MemSqlScanOp {
    fn execute_iter(
        &self,
        morsel: ScanMorsel,
        cancel: CancelToken,
    ) -> Result<BoxedExecIter, String> {
        let ScanMorsel::MemSqlPartition { index } = morsel else {
            return Err("memsql scan received unexpected morsel".to_string());
        };
        let descriptor = self
            .plan
            .partitions
            .get(index)
            .cloned()
            .ok_or_else(|| format!("memsql partition index out of bounds: {index}"))?;
        info!(
            "memsql scan starting: partition={} target={}:{} per_partition_sql={}",
            descriptor.index, descriptor.host, descriptor.port, self.plan.per_partition_sql
        );

        let spec = QuerySpec::value_rows(self.cfg.sql.clone(), self.cfg.params.clone());
        let rows = execute_partition(&self.cfg.conn, &self.plan, &spec, &descriptor, cancel);
        Ok(Box::new(MemSqlScanIter::new(
            rows,
            self.cfg.slot_ids.clone(),
            self.cfg.batch_size.unwrap_or(DEFAULT_SCAN_BATCH_SIZE),
            self.cfg.limit,
        )))
    }

    fn build_morsels(&self) -> Result<ScanMorsels, String> {
        let morsels = (0..self.plan.partitions.len())
            .map(|index| ScanMorsel::MemSqlPartition { index })
            .collect();
        Ok(ScanMorsels::new(morsels, false))
    }

    fn preferred_hosts(&self, morsel: &ScanMorsel) -> Vec<String> {
        let ScanMorsel::MemSqlPartition { index } = morsel else {
            return Vec::new();
        };
        self.plan
            .partitions
            .get(*index)
            .map(|p| vec![p.host.clone()])
            .unwrap_or_default()
    }
}

/// Engine-facing iterator: drains one partition's row sequence into bounded
/// arrow chunks.
struct MemSqlScanIter {
    rows: Option<PartitionRows<ValueRow>>,
    slot_ids: Vec<SlotId>,
    batch_size: usize,
    limit: Option<usize>,
    total_rows: usize,
    finished: bool,
}

impl MemSqlScanIter {
    fn new(
        rows: PartitionRows<ValueRow>,
        slot_ids: Vec<SlotId>,
        batch_size: usize,
        limit: Option<usize>,
    ) -> Self {
        Self {
            rows: Some(rows),
            slot_ids,
            batch_size: batch_size.max(1),
            limit,
            total_rows: 0,
            finished: false,
        }
    }

    fn remaining_limit(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.total_rows))
    }

    fn finish(&mut self) {
        self.finished = true;
        // Dropping the sequence disconnects the reader thread.
        self.rows = None;
    }
}

impl Iterator for MemSqlScanIter {
    type Item = ExecResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(remaining) = self.remaining_limit() {
            if remaining == 0 {
                self.finish();
                return None;
            }
        }

        let mut batch: Vec<ValueRow> = Vec::new();
        let mut exhausted = false;
        let hints;
        {
            let Some(rows) = self.rows.as_mut() else {
                self.finished = true;
                return None;
            };
            while batch.len() < self.batch_size {
                match rows.next() {
                    None => {
                        exhausted = true;
                        break;
                    }
                    Some(Err(e)) => {
                        self.finish();
                        return Some(Err(e));
                    }
                    Some(Ok(values)) => batch.push(values),
                }
            }
            hints = rows.column_hints().map(|h| h.to_vec());
        }

        if batch.is_empty() {
            self.finish();
            return None;
        }
        let mut chunk = match chunk_from_value_rows(&batch, &self.slot_ids, hints.as_deref()) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finish();
                return Some(Err(e));
            }
        };
        if let Some(remaining) = self.remaining_limit() {
            if chunk.len() > remaining {
                chunk = chunk.slice(0, remaining);
                self.total_rows = self.total_rows.saturating_add(remaining);
                self.finish();
                return Some(Ok(chunk));
            }
        }
        self.total_rows = self.total_rows.saturating_add(chunk.len());
        if exhausted {
            self.rows = None;
        }
        Some(Ok(chunk))
    }
}

/// Build an arrow chunk from raw value rows.
///
/// Column types are inferred from the first non-null value per column;
/// columns that stay entirely null fall back to the cursor's column type
/// hint.
pub fn chunk_from_value_rows(
    rows: &[ValueRow],
    slot_ids: &[SlotId],
    hints: Option<&[DataType]>,
) -> Result<Chunk, String> {
    let col_count = hints
        .map(|h| h.len())
        .or_else(|| rows.first().map(|r| r.len()))
        .unwrap_or(slot_ids.len());
    if slot_ids.len() != col_count {
        return Err(format!(
            "memsql scan output columns/slot_ids mismatch: num_columns={} slot_ids={:?}",
            col_count, slot_ids
        ));
    }

    let mut builders: Vec<ColumnBuilder> = (0..col_count)
        .map(|idx| {
            let hint = hints
                .and_then(|h| h.get(idx).cloned())
                .unwrap_or(DataType::Null);
            ColumnBuilder::with_hint(hint)
        })
        .collect();
    for row in rows {
        if row.len() != col_count {
            return Err(format!(
                "memsql row width mismatch: expected {} columns, got {}",
                col_count,
                row.len()
            ));
        }
        for (idx, value) in row.iter().enumerate() {
            builders[idx].push(value);
        }
    }

    let mut fields = Vec::with_capacity(col_count);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(col_count);
    for (idx, builder) in builders.into_iter().enumerate() {
        let array = builder.finish(rows.len())?;
        let field = field_with_slot_id(
            Field::new(format!("col_{idx}"), array.data_type().clone(), true),
            slot_ids[idx],
        );
        fields.push(field);
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = if arrays.is_empty() {
        let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
        RecordBatch::try_new_with_options(schema, arrays, &options)
    } else {
        RecordBatch::try_new(schema, arrays)
    }
    .map_err(|e| e.to_string())?;
    Chunk::try_new(batch)
}

enum ColumnBuilder {
    Unknown { nulls: usize, hint: DataType },
    Int64(Int64Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
}

impl ColumnBuilder {
    fn with_hint(hint: DataType) -> Self {
        ColumnBuilder::Unknown { nulls: 0, hint }
    }

    fn push(&mut self, value: &Value) {
        match value {
            Value::NULL => self.push_null(),
            Value::Int(v) => self.push_int64(*v),
            Value::UInt(v) => self.push_int64(*v as i64),
            Value::Float(v) => self.push_float64(*v as f64),
            Value::Double(v) => self.push_float64(*v),
            Value::Bytes(b) => {
                let s = String::from_utf8_lossy(b);
                self.push_utf8(s.as_ref());
            }
            Value::Date(y, m, d, hh, mm, ss, _micros) => {
                let s = format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, hh, mm, ss);
                self.push_utf8(&s);
            }
            Value::Time(is_neg, days, hours, minutes, seconds, _micros) => {
                let sign = if *is_neg { "-" } else { "" };
                let total_hours = *days * 24 + u32::from(*hours);
                let s = format!("{sign}{:02}:{:02}:{:02}", total_hours, minutes, seconds);
                self.push_utf8(&s);
            }
        }
    }

    fn push_null(&mut self) {
        match self {
            ColumnBuilder::Unknown { nulls, .. } => *nulls += 1,
            ColumnBuilder::Int64(b) => b.append_null(),
            ColumnBuilder::Float64(b) => b.append_null(),
            ColumnBuilder::Utf8(b) => b.append_null(),
        }
    }

    fn push_int64(&mut self, value: i64) {
        match self {
            ColumnBuilder::Unknown { nulls, .. } => {
                let mut b = Int64Builder::new();
                for _ in 0..*nulls {
                    b.append_null();
                }
                b.append_value(value);
                *self = ColumnBuilder::Int64(b);
            }
            ColumnBuilder::Int64(b) => b.append_value(value),
            _ => self.push_null(),
        }
    }

    fn push_float64(&mut self, value: f64) {
        match self {
            ColumnBuilder::Unknown { nulls, .. } => {
                let mut b = Float64Builder::new();
                for _ in 0..*nulls {
                    b.append_null();
                }
                b.append_value(value);
                *self = ColumnBuilder::Float64(b);
            }
            ColumnBuilder::Float64(b) => b.append_value(value),
            _ => self.push_null(),
        }
    }

    fn push_utf8(&mut self, value: &str) {
        match self {
            ColumnBuilder::Unknown { nulls, .. } => {
                let mut b = StringBuilder::new();
                for _ in 0..*nulls {
                    b.append_null();
                }
                b.append_value(value);
                *self = ColumnBuilder::Utf8(b);
            }
            ColumnBuilder::Utf8(b) => b.append_value(value),
            _ => self.push_null(),
        }
    }

    fn finish(self, row_count: usize) -> Result<ArrayRef, String> {
        match self {
            ColumnBuilder::Unknown { hint, .. } => null_array_for_type(&hint, row_count),
            ColumnBuilder::Int64(mut b) => Ok(Arc::new(b.finish())),
            ColumnBuilder::Float64(mut b) => Ok(Arc::new(b.finish())),
            ColumnBuilder::Utf8(mut b) => Ok(Arc::new(b.finish())),
        }
    }
}

fn null_array_for_type(dtype: &DataType, len: usize) -> Result<ArrayRef, String> {
    match dtype {
        DataType::Int64 => {
            let mut b = Int64Builder::new();
            for _ in 0..len {
                b.append_null();
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Float64 => {
            let mut b = Float64Builder::new();
            for _ in 0..len {
                b.append_null();
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::new();
            for _ in 0..len {
                b.append_null();
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Null => Ok(Arc::new(NullArray::new(len))),
        other => Err(format!("unsupported memsql column type hint: {:?}", other)),
    }
}
