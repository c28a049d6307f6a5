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

//! MemSQL scan connector.
//!
//! A query against a MemSQL cluster is planned once on the coordinating side:
//! the aggregator's explain output decides whether the query decomposes into
//! independent per-partition fragments, and `SHOW PARTITIONS` maps each
//! partition ordinal to the leaf node hosting its master copy. Each partition
//! then becomes one scan morsel, executed over its own connection straight to
//! the leaf, with the aggregator-only path as fallback for queries that do
//! not decompose.

pub mod conn;
pub mod cursor;
pub mod plan;
pub mod rewrite;
pub mod scan;

pub use conn::MemSqlConnInfo;
pub use cursor::{PartitionRows, RowMapper, ValueRow, value_row_mapper};
pub use plan::{PartitionDescriptor, QueryPlan, plan_query};
pub use rewrite::fragment_query;
pub use scan::{
    MemSqlScanConfig, MemSqlScanOp, QuerySpec, chunk_from_value_rows, execute_partition,
};
