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
use crate::connector::memsql::plan::QueryPlan;

/// Produce the exact query string to run against one partition's leaf node.
///
/// The fragment template is the per-node query text the explain output
/// reported for partition 0, so it references the partition-local database as
/// `{database}_0`. Rewriting is a literal substring replacement of that
/// suffix with `_{partition_index}`.
///
/// This is deliberately NOT a numeric pattern match: a general digit rewrite
/// would corrupt unrelated identifiers. The literal form is still fragile in
/// the opposite direction: any identifier that happens to contain
/// `{database}_0` is rewritten too.
pub fn fragment_query(plan: &QueryPlan, database: &str, sql: &str, partition_index: u32) -> String {
    if !plan.per_partition_sql {
        // Fallback path: the whole query runs on the aggregator, parameters
        // are bound later through the prepared-statement path.
        return sql.to_string();
    }
    let from = format!("{database}_0");
    let to = format!("{database}_{partition_index}");
    plan.fragment_template.replace(&from, &to)
}
