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
//! Integration tests for the MemSQL connector: planning decisions, fragment
//! rewriting, morsel layout, and chunk assembly, all without a live cluster.

use std::sync::Arc;

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use mysql::Value;

use memrocks::common::ids::SlotId;
use memrocks::connector::memsql::plan::{
    self, ExplainRow, PartitionDescriptor, PartitionRow, QueryPlan,
};
use memrocks::connector::memsql::{MemSqlConnInfo, fragment_query};
use memrocks::connector::{self, ScanConfig};
use memrocks::exec::node::scan::{ScanMorsel, ScanOp};
use memrocks::memrocks_connector_memsql::{
    MemSqlScanConfig, MemSqlScanOp, chunk_from_value_rows,
};

fn conn_info() -> MemSqlConnInfo {
    MemSqlConnInfo {
        host: "agg.example".to_string(),
        port: 3306,
        user: "root".to_string(),
        password: "".to_string(),
        database: "acme".to_string(),
    }
}

fn explain_row(extra: &str, query: Option<&str>, select_type: Option<&str>) -> ExplainRow {
    ExplainRow {
        extra: Some(extra.to_string()),
        query: query.map(str::to_string),
        select_type: select_type.map(str::to_string),
    }
}

fn gather_rows() -> Vec<ExplainRow> {
    vec![
        explain_row("memsql: Simple Iterator -> Network", None, Some("GATHER")),
        explain_row(
            "",
            Some("SELECT * FROM acme_0.t WHERE x > 1"),
            Some("SIMPLE"),
        ),
    ]
}

fn three_partition_plan() -> Arc<QueryPlan> {
    Arc::new(QueryPlan {
        per_partition_sql: true,
        fragment_template: "SELECT * FROM acme_0.t".to_string(),
        partitions: vec![
            PartitionDescriptor {
                index: 0,
                host: "leaf-0".to_string(),
                port: 3307,
            },
            PartitionDescriptor {
                index: 1,
                host: "leaf-1".to_string(),
                port: 3307,
            },
            PartitionDescriptor {
                index: 2,
                host: "leaf-2".to_string(),
                port: 3307,
            },
        ],
    })
}

fn scan_config() -> MemSqlScanConfig {
    MemSqlScanConfig {
        conn: conn_info(),
        sql: "SELECT * FROM t".to_string(),
        params: vec![],
        slot_ids: vec![SlotId::new(0)],
        limit: None,
        batch_size: None,
    }
}

#[test]
fn test_connector_registry_has_memsql() {
    let registry = connector::ConnectorRegistry::default();
    let debug = format!("{registry:?}");
    assert!(debug.contains("memsql"), "registry={debug}");
}

#[test]
fn test_unknown_connector_is_rejected() {
    let registry = connector::ConnectorRegistry::new();
    let err = registry
        .create_scan_node("memsql", ScanConfig::MemSql(scan_config()))
        .expect_err("empty registry");
    assert!(err.contains("unknown scan connector"), "err={err}");
}

#[test]
fn test_explain_keyword_follows_major_version() {
    assert_eq!(plan::parse_major_version("5.5.8").expect("parse"), 5);
    assert_eq!(
        plan::parse_major_version("4.1.0-distributed").expect("parse"),
        4
    );
    assert!(plan::parse_major_version("banana").is_err());

    assert_eq!(plan::explain_keyword(3), "EXPLAIN");
    assert_eq!(plan::explain_keyword(4), "EXPLAIN EXTENDED");
    assert_eq!(plan::explain_keyword(7), "EXPLAIN EXTENDED");
}

#[test]
fn test_network_gather_plan_is_accepted() {
    let template = plan::accept_decomposition(&gather_rows()).expect("decomposable");
    assert_eq!(template, "SELECT * FROM acme_0.t WHERE x > 1");
}

#[test]
fn test_non_gather_plan_is_rejected() {
    let rows = vec![
        explain_row("memsql: Table scan", None, Some("SIMPLE")),
        explain_row("", Some("SELECT 1"), Some("SIMPLE")),
    ];
    assert!(plan::accept_decomposition(&rows).is_none());
}

#[test]
fn test_distributed_result_stage_is_rejected() {
    let mut rows = gather_rows();
    rows.push(explain_row("", Some("SELECT ..."), Some("DRESULT")));
    assert!(plan::accept_decomposition(&rows).is_none());
}

#[test]
fn test_single_row_plan_is_rejected() {
    let rows = vec![explain_row(
        "memsql: Simple Iterator -> Network",
        None,
        Some("GATHER"),
    )];
    assert!(plan::accept_decomposition(&rows).is_none());
}

#[test]
fn test_only_master_partitions_are_kept() {
    let rows = vec![
        PartitionRow {
            ordinal: 0,
            host: "leaf-0".to_string(),
            port: 3307,
            role: Some("Master".to_string()),
        },
        PartitionRow {
            ordinal: 0,
            host: "leaf-1".to_string(),
            port: 3307,
            role: Some("Slave".to_string()),
        },
        PartitionRow {
            ordinal: 1,
            host: "leaf-1".to_string(),
            port: 3307,
            role: Some("master".to_string()),
        },
    ];
    let partitions = plan::partitions_from_rows(&rows);
    assert_eq!(
        partitions,
        vec![
            PartitionDescriptor {
                index: 0,
                host: "leaf-0".to_string(),
                port: 3307,
            },
            PartitionDescriptor {
                index: 1,
                host: "leaf-1".to_string(),
                port: 3307,
            },
        ]
    );
}

#[test]
fn test_fallback_plan_targets_aggregator() {
    let info = conn_info();
    let plan = plan::fallback_plan(&info);
    assert!(!plan.per_partition_sql);
    assert_eq!(plan.partitions.len(), 1);
    assert_eq!(plan.partitions[0].host, "agg.example");
    assert_eq!(plan.partitions[0].port, 3306);
}

#[test]
fn test_fragment_rewrite_per_partition() {
    let plan = three_partition_plan();
    assert_eq!(
        fragment_query(&plan, "acme", "unused", 2),
        "SELECT * FROM acme_2.t"
    );
    // Partition 0 runs the template verbatim.
    assert_eq!(
        fragment_query(&plan, "acme", "unused", 0),
        "SELECT * FROM acme_0.t"
    );
}

#[test]
fn test_scan_op_builds_one_morsel_per_partition() {
    let op = MemSqlScanOp::with_plan(scan_config(), three_partition_plan());
    let morsels = op.build_morsels().expect("morsels");
    assert!(!morsels.has_more);
    assert_eq!(morsels.morsels.len(), 3);
    for (i, morsel) in morsels.morsels.iter().enumerate() {
        match morsel {
            ScanMorsel::MemSqlPartition { index } => assert_eq!(*index, i),
            other => panic!("unexpected morsel: {other:?}"),
        }
    }
}

#[test]
fn test_scan_op_prefers_partition_host() {
    let op = MemSqlScanOp::with_plan(scan_config(), three_partition_plan());
    let hosts = op.preferred_hosts(&ScanMorsel::MemSqlPartition { index: 1 });
    assert_eq!(hosts, vec!["leaf-1".to_string()]);
    assert!(
        op.preferred_hosts(&ScanMorsel::MemSqlPartition { index: 9 })
            .is_empty()
    );
    assert!(op.preferred_hosts(&ScanMorsel::Empty).is_empty());
}

#[test]
fn test_chunk_assembly_infers_mixed_columns() {
    let slot_ids = vec![SlotId::new(0), SlotId::new(1), SlotId::new(2)];
    let rows = vec![
        vec![
            Value::Int(7),
            Value::Double(1.5),
            Value::Bytes(b"north".to_vec()),
        ],
        vec![Value::Int(8), Value::NULL, Value::Bytes(b"south".to_vec())],
    ];
    let chunk = chunk_from_value_rows(&rows, &slot_ids, None).expect("chunk");
    assert_eq!(chunk.len(), 2);

    let ints = chunk.columns()[0]
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int column");
    assert_eq!(ints.value(1), 8);
    let floats = chunk.columns()[1]
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("float column");
    assert_eq!(floats.value(0), 1.5);
    assert!(floats.is_null(1));
    let strings = chunk.columns()[2]
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("string column");
    assert_eq!(strings.value(0), "north");

    // Columns are addressable by their slot id.
    let by_slot = chunk.column_by_slot_id(SlotId::new(2)).expect("slot 2");
    assert_eq!(by_slot.len(), 2);
}

#[test]
fn test_chunk_assembly_uses_hints_for_null_only_columns() {
    let slot_ids = vec![SlotId::new(0), SlotId::new(1)];
    let rows = vec![
        vec![Value::NULL, Value::Int(1)],
        vec![Value::NULL, Value::Int(2)],
    ];
    let hints = [DataType::Utf8, DataType::Int64];
    let chunk = chunk_from_value_rows(&rows, &slot_ids, Some(&hints)).expect("chunk");
    let strings = chunk.columns()[0]
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("string column from hint");
    assert_eq!(strings.null_count(), 2);
}
