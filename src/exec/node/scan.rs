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

use crate::exec::node::BoxedExecIter;
use crate::runtime::cancel::CancelToken;

/// One independently-schedulable unit of scan work.
///
/// Morsels are produced once on the coordinating side and handed out to scan
/// operators, potentially on different workers. A morsel only names the unit
/// of work; the owning `ScanOp` resolves it against its own plan state.
#[derive(Clone, Debug)]
pub enum ScanMorsel {
    MemSqlPartition { index: usize },
    Empty,
}

impl ScanMorsel {
    pub fn describe(&self) -> String {
        match self {
            ScanMorsel::MemSqlPartition { index } => format!("memsql_partition_index={index}"),
            ScanMorsel::Empty => "empty".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScanMorsels {
    pub morsels: Vec<ScanMorsel>,
    pub has_more: bool,
}

impl ScanMorsels {
    pub fn new(morsels: Vec<ScanMorsel>, has_more: bool) -> Self {
        Self { morsels, has_more }
    }

    pub fn ensure_non_empty(&mut self, accept_empty_scan_ranges: bool) {
        if accept_empty_scan_ranges {
            return;
        }
        if self.morsels.is_empty() {
            self.morsels.push(ScanMorsel::Empty);
        }
    }
}

/// Connector-side contract consumed by the scheduling runtime.
///
/// `build_morsels` is invoked exactly once, before any morsel is dispatched;
/// `execute_iter` is invoked with morsels previously returned by
/// `build_morsels`, one invocation per morsel, potentially concurrently.
/// The runtime signals task cancellation through the `CancelToken`; the
/// operator must release its resources without raising.
pub trait ScanOp: Send + Sync {
    fn execute_iter(&self, morsel: ScanMorsel, cancel: CancelToken)
    -> Result<BoxedExecIter, String>;

    fn build_morsels(&self) -> Result<ScanMorsels, String>;

    /// Placement hint for the scheduler, not a hard constraint.
    fn preferred_hosts(&self, _morsel: &ScanMorsel) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Clone)]
pub struct ScanNode {
    op: Arc<dyn ScanOp>,
    node_id: Option<i32>,
    limit: Option<usize>,
    accept_empty_scan_ranges: bool,
}

impl ScanNode {
    pub fn new(op: Arc<dyn ScanOp>) -> Self {
        Self {
            op,
            node_id: None,
            limit: None,
            accept_empty_scan_ranges: false,
        }
    }

    pub fn with_node_id(mut self, node_id: i32) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_accept_empty_scan_ranges(mut self, value: bool) -> Self {
        self.accept_empty_scan_ranges = value;
        self
    }

    pub fn node_id(&self) -> Option<i32> {
        self.node_id
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn accept_empty_scan_ranges(&self) -> bool {
        self.accept_empty_scan_ranges
    }

    pub fn execute_iter(
        &self,
        morsel: ScanMorsel,
        cancel: CancelToken,
    ) -> Result<BoxedExecIter, String> {
        if matches!(morsel, ScanMorsel::Empty) {
            return Ok(Box::new(std::iter::empty()));
        }
        self.op.execute_iter(morsel, cancel)
    }

    pub fn build_morsels(&self) -> Result<ScanMorsels, String> {
        let mut morsels = self.op.build_morsels()?;
        morsels.ensure_non_empty(self.accept_empty_scan_ranges);
        Ok(morsels)
    }

    pub fn preferred_hosts(&self, morsel: &ScanMorsel) -> Vec<String> {
        self.op.preferred_hosts(morsel)
    }
}

impl std::fmt::Debug for ScanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanNode")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morsels_backfill_empty_marker() {
        let mut morsels = ScanMorsels::new(Vec::new(), false);
        morsels.ensure_non_empty(false);
        assert_eq!(morsels.morsels.len(), 1);
        assert!(matches!(morsels.morsels[0], ScanMorsel::Empty));

        let mut accepted = ScanMorsels::new(Vec::new(), false);
        accepted.ensure_non_empty(true);
        assert!(accepted.morsels.is_empty());
    }

    #[test]
    fn morsel_describe_names_partition() {
        let morsel = ScanMorsel::MemSqlPartition { index: 3 };
        assert_eq!(morsel.describe(), "memsql_partition_index=3");
    }
}
