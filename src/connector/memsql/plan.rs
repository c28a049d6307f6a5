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
use mysql::prelude::Queryable;
use mysql::{Column, Conn, Params, Row, Value, from_value_opt};

use crate::connector::memsql::conn::MemSqlConnInfo;
use crate::memrocks_logging::{info, warn};

const VERSION_QUERY: &str = "SHOW VARIABLES LIKE 'memsql_version'";
const PARTITIONS_QUERY: &str = "SHOW PARTITIONS";

/// Extra annotation of a plan whose root is a plain network gather; only such
/// plans can be decomposed into independent per-partition fragments.
const NETWORK_GATHER_EXTRA: &str = "memsql: Simple Iterator -> Network";

/// select_type marking a distributed intermediate-result stage. Its presence
/// means cross-node coordination, which breaks per-partition independence.
const DISTRIBUTED_RESULT_STAGE: &str = "DRESULT";

const EXPLAIN_QUERY_COLUMN: &str = "Query";
const MASTER_ROLE: &str = "Master";

/// Versions from this major on expose per-node query text only through
/// `EXPLAIN EXTENDED`; older versions expose it through plain `EXPLAIN`.
const EXTENDED_EXPLAIN_MAJOR: u32 = 4;

/// One independently-executable unit of work and its target leaf node.
/// Created during planning, consumed once per task execution, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub index: u32,
    pub host: String,
    pub port: u16,
}

/// Outcome of planning, computed once per query on the coordinating side and
/// shared immutably with every partition reader.
///
/// Invariant: `per_partition_sql` implies `partitions` is non-empty with
/// distinct indices; otherwise exactly one partition targets the aggregator.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub per_partition_sql: bool,
    pub fragment_template: String,
    pub partitions: Vec<PartitionDescriptor>,
}

/// One row of the explain output, reduced to the three columns the
/// decomposition decision looks at.
#[derive(Clone, Debug, Default)]
pub struct ExplainRow {
    pub extra: Option<String>,
    pub query: Option<String>,
    pub select_type: Option<String>,
}

/// One row of `SHOW PARTITIONS`.
#[derive(Clone, Debug)]
pub struct PartitionRow {
    pub ordinal: u32,
    pub host: String,
    pub port: u16,
    pub role: Option<String>,
}

/// Plan the given query against the cluster.
///
/// Runs exactly once, on the coordinating side, before any partition work is
/// dispatched. Opens a short-lived aggregator connection that is released on
/// every exit path. Any database error is a fatal planning failure; there is
/// no retry at this level.
pub fn plan_query(info: &MemSqlConnInfo, sql: &str, params: &[Value]) -> Result<QueryPlan, String> {
    let mut conn = info.open()?;

    let major = query_major_version(&mut conn)?;
    let keyword = explain_keyword(major);

    let Some(explain_rows) = explain_plan_rows(&mut conn, keyword, sql, params)? else {
        info!("explain output has no per-node query text, falling back to single-partition scan");
        return Ok(fallback_plan(info));
    };
    let Some(template) = accept_decomposition(&explain_rows) else {
        info!(
            "explain plan rejects per-partition execution ({} plan rows), falling back to single-partition scan",
            explain_rows.len()
        );
        return Ok(fallback_plan(info));
    };

    let partition_rows = cluster_partitions(&mut conn)?;
    let partitions = partitions_from_rows(&partition_rows);
    if partitions.is_empty() {
        warn!("SHOW PARTITIONS reported no master partitions, falling back to single-partition scan");
        return Ok(fallback_plan(info));
    }

    info!(
        "planned per-partition memsql scan: partitions={} explain_dialect={}",
        partitions.len(),
        keyword
    );
    Ok(QueryPlan {
        per_partition_sql: true,
        fragment_template: template,
        partitions,
    })
}

/// Whole-query fallback: one partition targeting the aggregator, parameters
/// bound at execution time through the prepared-statement path.
pub fn fallback_plan(info: &MemSqlConnInfo) -> QueryPlan {
    QueryPlan {
        per_partition_sql: false,
        fragment_template: String::new(),
        partitions: vec![PartitionDescriptor {
            index: 0,
            host: info.host.clone(),
            port: info.port,
        }],
    }
}

pub fn parse_major_version(version: &str) -> Result<u32, String> {
    let first = version.split('.').next().unwrap_or("");
    let digits: String = first.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits
        .parse::<u32>()
        .map_err(|_| format!("cannot parse memsql version string: {version:?}"))
}

pub fn explain_keyword(major: u32) -> &'static str {
    if major >= EXTENDED_EXPLAIN_MAJOR {
        "EXPLAIN EXTENDED"
    } else {
        "EXPLAIN"
    }
}

/// Decide whether the explain output admits per-partition execution.
/// Returns the fragment template (the second plan row's query text) on
/// acceptance.
pub fn accept_decomposition(rows: &[ExplainRow]) -> Option<String> {
    let first = rows.first()?;
    if first.extra.as_deref() != Some(NETWORK_GATHER_EXTRA) {
        return None;
    }
    if rows.len() < 2 {
        return None;
    }
    if rows
        .iter()
        .any(|row| row.select_type.as_deref() == Some(DISTRIBUTED_RESULT_STAGE))
    {
        return None;
    }
    rows.get(1)?.query.clone()
}

/// Keep only each partition's master copy; replicas are not scan targets.
pub fn partitions_from_rows(rows: &[PartitionRow]) -> Vec<PartitionDescriptor> {
    rows.iter()
        .filter(|row| {
            row.role
                .as_deref()
                .is_some_and(|role| role.eq_ignore_ascii_case(MASTER_ROLE))
        })
        .map(|row| PartitionDescriptor {
            index: row.ordinal,
            host: row.host.clone(),
            port: row.port,
        })
        .collect()
}

fn query_major_version(conn: &mut Conn) -> Result<u32, String> {
    let mut result = conn
        .query_iter(VERSION_QUERY)
        .map_err(|e| format!("query memsql version failed: {e}"))?;
    let row = match result.next() {
        Some(row) => row.map_err(|e| format!("read memsql version row failed: {e}"))?,
        None => return Err("memsql_version variable not set, is this a memsql cluster?".to_string()),
    };
    drop(result);
    // SHOW VARIABLES rows are (Variable_name, Value).
    let version =
        row_text(&row, 1).ok_or_else(|| "memsql_version variable value is empty".to_string())?;
    parse_major_version(&version)
}

/// Run the explain variant prefixed to the target query, parameters bound.
/// Returns `None` when the result schema carries no per-node query text,
/// which means the query cannot be decomposed.
fn explain_plan_rows(
    conn: &mut Conn,
    keyword: &str,
    sql: &str,
    params: &[Value],
) -> Result<Option<Vec<ExplainRow>>, String> {
    let explain_sql = format!("{keyword} {sql}");
    let result = conn
        .exec_iter(explain_sql.as_str(), Params::from(params.to_vec()))
        .map_err(|e| format!("explain query failed: {e}"))?;

    let columns = result.columns();
    let meta = columns.as_ref();
    let Some(query_idx) = find_column(meta, EXPLAIN_QUERY_COLUMN) else {
        return Ok(None);
    };
    let extra_idx = find_column(meta, "Extra");
    let select_type_idx = find_column(meta, "select_type");

    let mut rows = Vec::new();
    for item in result {
        let row = item.map_err(|e| format!("read explain row failed: {e}"))?;
        rows.push(ExplainRow {
            extra: extra_idx.and_then(|i| row_text(&row, i)),
            query: row_text(&row, query_idx),
            select_type: select_type_idx.and_then(|i| row_text(&row, i)),
        });
    }
    Ok(Some(rows))
}

fn cluster_partitions(conn: &mut Conn) -> Result<Vec<PartitionRow>, String> {
    let result = conn
        .query_iter(PARTITIONS_QUERY)
        .map_err(|e| format!("show partitions failed: {e}"))?;

    let columns = result.columns();
    let meta = columns.as_ref();
    let ordinal_idx = require_column(meta, "Ordinal")?;
    let host_idx = require_column(meta, "Host")?;
    let port_idx = require_column(meta, "Port")?;
    let role_idx = require_column(meta, "Role")?;

    let mut rows = Vec::new();
    for item in result {
        let row = item.map_err(|e| format!("read partition row failed: {e}"))?;
        let ordinal = row_parse::<u32>(&row, ordinal_idx)
            .ok_or_else(|| format!("partition row has invalid Ordinal: {row:?}"))?;
        let host = row_text(&row, host_idx)
            .ok_or_else(|| format!("partition row has empty Host: {row:?}"))?;
        let port = row_parse::<u16>(&row, port_idx)
            .ok_or_else(|| format!("partition row has invalid Port: {row:?}"))?;
        rows.push(PartitionRow {
            ordinal,
            host,
            port,
            role: row_text(&row, role_idx),
        });
    }
    Ok(rows)
}

fn find_column(columns: &[Column], name: &str) -> Option<usize> {
    columns.iter().position(|col| col.name_str() == name)
}

fn require_column(columns: &[Column], name: &str) -> Result<usize, String> {
    find_column(columns, name)
        .ok_or_else(|| format!("SHOW PARTITIONS output is missing the {name} column"))
}

fn row_text(row: &Row, idx: usize) -> Option<String> {
    match row.as_ref(idx) {
        None | Some(Value::NULL) => None,
        Some(value) => from_value_opt::<String>(value.clone()).ok(),
    }
}

fn row_parse<T: mysql::prelude::FromValue>(row: &Row, idx: usize) -> Option<T> {
    match row.as_ref(idx) {
        None | Some(Value::NULL) => None,
        Some(value) => from_value_opt::<T>(value.clone()).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn explain_row(extra: &str, query: &str, select_type: &str) -> ExplainRow {
        ExplainRow {
            extra: Some(extra.to_string()),
            query: Some(query.to_string()),
            select_type: Some(select_type.to_string()),
        }
    }

    #[test]
    fn major_version_selects_explain_dialect() {
        assert_eq!(parse_major_version("4.0.1").expect("parse"), 4);
        assert_eq!(parse_major_version("3.2.0").expect("parse"), 3);
        assert_eq!(explain_keyword(4), "EXPLAIN EXTENDED");
        assert_eq!(explain_keyword(3), "EXPLAIN");
        assert_eq!(explain_keyword(7), "EXPLAIN EXTENDED");
    }

    #[test]
    fn major_version_tolerates_suffixes() {
        assert_eq!(parse_major_version("5rc1.0.0").expect("parse"), 5);
        assert!(parse_major_version("").is_err());
        assert!(parse_major_version("beta").is_err());
    }

    #[test]
    fn network_gather_plan_is_accepted() {
        let rows = vec![
            explain_row(NETWORK_GATHER_EXTRA, "SELECT * FROM acme_0.t", "SIMPLE"),
            explain_row("memsql: leaf", "SELECT * FROM acme_0.t", "SIMPLE"),
        ];
        let template = accept_decomposition(&rows).expect("accepted");
        assert_eq!(template, "SELECT * FROM acme_0.t");
    }

    #[test]
    fn template_comes_from_second_row() {
        let rows = vec![
            explain_row(NETWORK_GATHER_EXTRA, "gather text", "SIMPLE"),
            explain_row("leaf", "leaf text", "SIMPLE"),
            explain_row("leaf", "other leaf text", "SIMPLE"),
        ];
        assert_eq!(accept_decomposition(&rows).as_deref(), Some("leaf text"));
    }

    #[test]
    fn distributed_result_stage_is_rejected() {
        let rows = vec![
            explain_row(NETWORK_GATHER_EXTRA, "gather text", "SIMPLE"),
            explain_row("leaf", "leaf text", "SIMPLE"),
            explain_row("leaf", "reshuffle", "DRESULT"),
        ];
        assert!(accept_decomposition(&rows).is_none());
    }

    #[test]
    fn single_row_plan_is_rejected() {
        let rows = vec![explain_row(NETWORK_GATHER_EXTRA, "gather text", "SIMPLE")];
        assert!(accept_decomposition(&rows).is_none());
    }

    #[test]
    fn non_gather_root_is_rejected() {
        let rows = vec![
            explain_row("memsql: HashGroupBy", "gather text", "SIMPLE"),
            explain_row("leaf", "leaf text", "SIMPLE"),
        ];
        assert!(accept_decomposition(&rows).is_none());
    }

    #[test]
    fn only_master_partitions_become_descriptors() {
        let rows = vec![
            PartitionRow {
                ordinal: 0,
                host: "leaf-a".to_string(),
                port: 3306,
                role: Some("Master".to_string()),
            },
            PartitionRow {
                ordinal: 0,
                host: "leaf-b".to_string(),
                port: 3306,
                role: Some("Slave".to_string()),
            },
            PartitionRow {
                ordinal: 1,
                host: "leaf-b".to_string(),
                port: 3306,
                role: Some("Master".to_string()),
            },
            PartitionRow {
                ordinal: 2,
                host: "leaf-c".to_string(),
                port: 3306,
                role: None,
            },
        ];
        let partitions = partitions_from_rows(&rows);
        assert_eq!(partitions.len(), 2);
        let indices: HashSet<u32> = partitions.iter().map(|p| p.index).collect();
        assert_eq!(indices.len(), partitions.len(), "indices must be distinct");
        assert_eq!(partitions[0].host, "leaf-a");
        assert_eq!(partitions[1].host, "leaf-b");
    }

    #[test]
    fn fallback_plan_targets_the_aggregator() {
        let info = MemSqlConnInfo {
            host: "agg.example".to_string(),
            port: 3307,
            user: "root".to_string(),
            password: "".to_string(),
            database: "acme".to_string(),
        };
        let plan = fallback_plan(&info);
        assert!(!plan.per_partition_sql);
        assert!(plan.fragment_template.is_empty());
        assert_eq!(
            plan.partitions,
            vec![PartitionDescriptor {
                index: 0,
                host: "agg.example".to_string(),
                port: 3307,
            }]
        );
    }
}
