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
use mysql::{Conn, OptsBuilder};

use crate::common::app_config::MemSqlConfig;

/// Everything needed to open one MemSQL connection.
///
/// Planning connects to the aggregator; partition readers derive per-node
/// infos with `with_endpoint`/`with_database`. Connections opened from an
/// info are one-shot and exclusively owned by their opener.
#[derive(Clone, Debug)]
pub struct MemSqlConnInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl MemSqlConnInfo {
    pub fn from_config(cfg: &MemSqlConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            database: cfg.database.clone(),
        }
    }

    pub fn with_endpoint(&self, host: &str, port: u16) -> Self {
        let mut out = self.clone();
        out.host = host.to_string();
        out.port = port;
        out
    }

    pub fn with_database(&self, database: String) -> Self {
        let mut out = self.clone();
        out.database = database;
        out
    }

    pub fn open(&self) -> Result<Conn, String> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.host.as_str()))
            .tcp_port(self.port)
            // Leaf connections target a specific (host, port); never let the
            // client silently upgrade localhost to a unix socket.
            .prefer_socket(false)
            .user(Some(self.user.as_str()))
            .pass(Some(self.password.as_str()))
            .db_name(Some(self.database.as_str()));
        Conn::new(opts).map_err(|e| {
            format!(
                "connect to memsql {}:{}/{} failed: {e}",
                self.host, self.port, self.database
            )
        })
    }
}
