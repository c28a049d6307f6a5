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
use std::env;
use std::process;

use mysql::Value;

use memrocks::CancelToken;
use memrocks::memrocks_config;
use memrocks::memrocks_connector_memsql::{
    MemSqlConnInfo, QueryPlan, QuerySpec, execute_partition, plan_query,
};
use memrocks::memrocks_logging;

fn print_usage() {
    eprintln!("Usage: memrocks [plan|scan] [--config <path>] [--limit <n>] <sql>");
    eprintln!("  plan   - Plan the query and print its partition layout (default)");
    eprintln!("  scan   - Plan the query, then read every partition and report row counts");
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut idx = 1usize;
    let mode = if args
        .get(idx)
        .is_some_and(|s| s == "plan" || s == "scan")
    {
        let m = args[idx].clone();
        idx += 1;
        m
    } else {
        "plan".to_string()
    };

    let mut config_path: Option<String> = None;
    let mut limit: Option<usize> = None;
    let mut sql_parts: Vec<String> = Vec::new();
    while let Some(arg) = args.get(idx) {
        match arg.as_str() {
            "--config" | "-c" => {
                idx += 1;
                config_path = args.get(idx).cloned();
                if config_path.is_none() {
                    eprintln!("missing value for --config/-c");
                    process::exit(1);
                }
                idx += 1;
            }
            "--limit" | "-n" => {
                idx += 1;
                let Some(raw) = args.get(idx) else {
                    eprintln!("missing value for --limit/-n");
                    process::exit(1);
                };
                match raw.parse::<usize>() {
                    Ok(v) => limit = Some(v),
                    Err(e) => {
                        eprintln!("invalid --limit value '{raw}': {e}");
                        process::exit(1);
                    }
                }
                idx += 1;
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            _ => {
                sql_parts.push(arg.clone());
                idx += 1;
            }
        }
    }
    if sql_parts.is_empty() {
        print_usage();
        process::exit(1);
    }
    let sql = sql_parts.join(" ");

    let cfg = match config_path.as_deref() {
        Some(p) => memrocks_config::init_from_path(p).expect("load memrocks config"),
        None => memrocks_config::init_from_env_or_default().expect("load memrocks config"),
    };
    memrocks_logging::init_with_level(&cfg.effective_log_filter());

    let Some(memsql) = cfg.memsql_config() else {
        eprintln!("config has no [memsql] section");
        process::exit(1);
    };
    let info = MemSqlConnInfo::from_config(memsql);

    let params: Vec<Value> = Vec::new();
    let plan = match plan_query(&info, &sql, &params) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("plan query failed: {e}");
            process::exit(1);
        }
    };
    print_plan(&plan);

    if mode == "scan" {
        scan_all_partitions(&info, &plan, &sql, params, limit);
    }
}

fn print_plan(plan: &QueryPlan) {
    println!(
        "mode: {}",
        if plan.per_partition_sql {
            "per-partition"
        } else {
            "aggregator fallback"
        }
    );
    for p in &plan.partitions {
        println!("partition {} -> {}:{}", p.index, p.host, p.port);
    }
}

fn scan_all_partitions(
    info: &MemSqlConnInfo,
    plan: &QueryPlan,
    sql: &str,
    params: Vec<Value>,
    limit: Option<usize>,
) {
    let spec = QuerySpec::value_rows(sql, params);
    let cancel = CancelToken::new();
    let mut total = 0usize;
    for descriptor in &plan.partitions {
        let mut count = 0usize;
        for item in execute_partition(info, plan, &spec, descriptor, cancel.clone()) {
            match item {
                Ok(_) => count += 1,
                Err(e) => {
                    eprintln!("partition {} failed: {e}", descriptor.index);
                    process::exit(1);
                }
            }
            if limit.is_some_and(|n| total + count >= n) {
                cancel.cancel();
                break;
            }
        }
        total += count;
        println!("partition {}: {} rows", descriptor.index, count);
        if limit.is_some_and(|n| total >= n) {
            break;
        }
    }
    println!("total: {} rows", total);
}
