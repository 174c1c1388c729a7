// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Sort processor with optional spilling to temp storage
//!
//! Rows are buffered against the processor's bound account. When the account
//! runs out of budget and temp storage is enabled, the buffer is sorted and
//! written out as a run under a key prefix unique to this processor. At the
//! end all runs are merged back in order.

use super::context::FlowContext;
use super::processor::Processor;
use super::row::{row_size, ConsumerStatus, Row, RowReceiver, RowSource, StreamItem};
use crate::config::Settings;
use crate::error::{FlowError, Result};
use crate::mon::BoundAccount;
use crate::tempstorage::{prefix_for, KvIter, TempStorage, TempStorageIdGenerator};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

pub(crate) struct Sorter {
    input: RowSource,
    column: usize,
    descending: bool,
    account: BoundAccount,
    settings: Arc<Settings>,
    temp_storage: Option<Arc<dyn TempStorage>>,
    temp_storage_ids: Arc<TempStorageIdGenerator>,
    log_tag: String,
}

impl Sorter {
    pub(crate) fn new(ctx: &FlowContext, input: RowSource, column: usize, descending: bool) -> Self {
        Self {
            input,
            column,
            descending,
            account: ctx.new_processor_account(),
            settings: ctx.settings.clone(),
            temp_storage: ctx.temp_storage.clone(),
            temp_storage_ids: ctx.temp_storage_ids.clone(),
            log_tag: ctx.log_tag(),
        }
    }

    /// Where to spill after `err`, or the error to fail with
    fn spill_target(&self, err: FlowError) -> Result<Arc<dyn TempStorage>> {
        if !self.settings.use_temp_storage() {
            return Err(err);
        }
        match &self.temp_storage {
            Some(storage) => Ok(storage.clone()),
            None => Err(FlowError::TempStorageUnavailable(format!(
                "sorter needs to spill after: {}",
                err
            ))),
        }
    }
}

fn compare_rows(a: &Row, b: &Row, column: usize, descending: bool) -> Ordering {
    let ord = match (a.get(column), b.get(column)) {
        (Some(x), Some(y)) => x.total_cmp(y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    };
    if descending {
        ord.reverse()
    } else {
        ord
    }
}

/// Sorted runs written to temp storage under one prefix. Whatever was
/// written is deleted when the state is dropped, so failed or canceled sorts
/// leave nothing behind.
struct SpillState {
    storage: Arc<dyn TempStorage>,
    prefix: [u8; 8],
    runs: u32,
    rows: u64,
    cleared: bool,
}

impl SpillState {
    fn new(storage: Arc<dyn TempStorage>, prefix: [u8; 8]) -> Self {
        Self {
            storage,
            prefix,
            runs: 0,
            rows: 0,
            cleared: false,
        }
    }

    fn run_prefix(&self, run: u32) -> Vec<u8> {
        let mut key = self.prefix.to_vec();
        key.extend_from_slice(&run.to_be_bytes());
        key
    }

    fn write_run(&mut self, rows: &[Row]) -> Result<()> {
        let run_prefix = self.run_prefix(self.runs);
        let mut entries = Vec::with_capacity(rows.len());
        for (seq, row) in rows.iter().enumerate() {
            let mut key = run_prefix.clone();
            key.extend_from_slice(&(seq as u64).to_be_bytes());
            entries.push((key, bincode::serialize(row)?));
        }
        self.storage.batch_insert(&entries)?;
        self.runs += 1;
        self.rows += rows.len() as u64;
        Ok(())
    }

    /// Delete every run
    fn clear(&mut self) -> Result<()> {
        self.cleared = true;
        self.storage.clear_prefix(&self.prefix)
    }
}

impl Drop for SpillState {
    fn drop(&mut self) {
        if self.cleared {
            return;
        }
        if let Err(err) = self.clear() {
            log::error!(
                "failed to remove spilled runs under {:?}: {}",
                self.prefix,
                err
            );
        }
    }
}

/// Head of one run during the merge. Ordered so the max-heap pops the row
/// that sorts first; ties go to the earlier run.
struct MergeHead {
    row: Row,
    run: usize,
    column: usize,
    descending: bool,
}

impl PartialEq for MergeHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHead {}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&self.row, &other.row, self.column, self.descending)
            .then(self.run.cmp(&other.run))
            .reverse()
    }
}

fn next_row(iter: &mut KvIter<'_>) -> Result<Option<Row>> {
    match iter.next() {
        Some(entry) => {
            let (_, value) = entry?;
            Ok(Some(bincode::deserialize(&value)?))
        }
        None => Ok(None),
    }
}

impl Sorter {
    async fn merge_runs(
        &self,
        spill: &SpillState,
        output: &Arc<dyn RowReceiver>,
    ) -> Result<()> {
        let mut iters = Vec::with_capacity(spill.runs as usize);
        let mut heap = BinaryHeap::new();
        for run in 0..spill.runs {
            let mut iter = spill.storage.scan_prefix(&spill.run_prefix(run))?;
            if let Some(row) = next_row(&mut iter)? {
                heap.push(MergeHead {
                    row,
                    run: iters.len(),
                    column: self.column,
                    descending: self.descending,
                });
            }
            iters.push(iter);
        }

        while let Some(head) = heap.pop() {
            let run = head.run;
            if output.push(StreamItem::Row(head.row)).await == ConsumerStatus::ConsumerClosed {
                return Ok(());
            }
            if let Some(row) = next_row(&mut iters[run])? {
                heap.push(MergeHead {
                    row,
                    run,
                    column: self.column,
                    descending: self.descending,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Processor for Sorter {
    fn name(&self) -> &'static str {
        "sorter"
    }

    async fn run(mut self: Box<Self>, output: Arc<dyn RowReceiver>) -> Result<()> {
        let (column, descending) = (self.column, self.descending);
        let mut rows: Vec<Row> = Vec::new();
        let mut spill: Option<SpillState> = None;

        while let Some(item) = self.input.next().await {
            let row = match item {
                StreamItem::Row(row) => row,
                meta @ StreamItem::Meta(_) => {
                    if output.push(meta).await == ConsumerStatus::ConsumerClosed {
                        return Ok(());
                    }
                    continue;
                }
            };
            let size = row_size(&row);
            if let Err(err) = self.account.grow(size) {
                if !err.is_out_of_memory() {
                    return Err(err);
                }
                if spill.is_none() {
                    let storage = self.spill_target(err)?;
                    let id = self.temp_storage_ids.new_id();
                    log::info!(
                        "{} sorter spilling to {} temp storage under id {}",
                        self.log_tag,
                        storage.engine_name(),
                        id
                    );
                    spill = Some(SpillState::new(storage, prefix_for(id)));
                }
                if let Some(state) = spill.as_mut() {
                    rows.sort_by(|a, b| compare_rows(a, b, column, descending));
                    state.write_run(&rows)?;
                }
                rows.clear();
                self.account.clear();
                // A single row larger than the whole budget cannot be sorted.
                self.account.grow(size)?;
            }
            rows.push(row);
        }

        rows.sort_by(|a, b| compare_rows(a, b, column, descending));
        let Some(mut state) = spill else {
            for row in rows {
                if output.push(StreamItem::Row(row)).await == ConsumerStatus::ConsumerClosed {
                    break;
                }
            }
            self.account.close();
            return Ok(());
        };

        if !rows.is_empty() {
            state.write_run(&rows)?;
        }
        drop(rows);
        self.account.close();
        log::debug!(
            "{} sorter merging {} rows from {} runs",
            self.log_tag,
            state.rows,
            state.runs
        );
        let merged = self.merge_runs(&state, &output).await;
        let cleared = state.clear();
        merged?;
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::row::Datum;

    fn int_rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| vec![Datum::Int(*v)]).collect()
    }

    #[test]
    fn test_compare_rows_descending() {
        let a = vec![Datum::Int(1)];
        let b = vec![Datum::Int(2)];
        assert_eq!(compare_rows(&a, &b, 0, false), Ordering::Less);
        assert_eq!(compare_rows(&a, &b, 0, true), Ordering::Greater);
        // Short rows sort first.
        assert_eq!(compare_rows(&vec![], &a, 0, false), Ordering::Less);
    }

    #[test]
    fn test_merge_heap_pops_smallest_then_earliest_run() {
        let mut heap = BinaryHeap::new();
        for (value, run) in [(3, 0), (1, 1), (1, 0), (2, 2)] {
            heap.push(MergeHead {
                row: vec![Datum::Int(value)],
                run,
                column: 0,
                descending: false,
            });
        }
        let order: Vec<(i64, usize)> = std::iter::from_fn(|| heap.pop())
            .map(|h| match h.row[0] {
                Datum::Int(v) => (v, h.run),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![(1, 0), (1, 1), (2, 2), (3, 0)]);
    }

    #[test]
    fn test_spill_runs_are_keyed_under_prefix() {
        let storage = Arc::new(crate::tempstorage::MemoryTempStorage::new());
        let mut state = SpillState::new(storage.clone(), prefix_for(9));
        state.write_run(&int_rows(&[1, 2])).unwrap();
        state.write_run(&int_rows(&[0])).unwrap();
        assert_eq!(state.runs, 2);
        assert_eq!(storage.len(), 3);

        let first_run: Vec<_> = storage
            .scan_prefix(&state.run_prefix(0))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(first_run.len(), 2);
        assert!(first_run.iter().all(|(k, _)| k.starts_with(&prefix_for(9))));

        drop(state);
        assert!(storage.is_empty());
    }
}
