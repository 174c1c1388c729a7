// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Processors: the stages of a flow's DAG

use super::context::FlowContext;
use super::row::{ConsumerStatus, ProducerMetadata, RowReceiver, RowSource, StreamItem};
use super::sorter::Sorter;
use super::spec::ProcessorCoreSpec;
use crate::error::{FlowError, Result};
use crate::flow::row::Row;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

/// A stage that consumes its inputs and pushes results to one output.
///
/// `run` returns once the processor has nothing more to emit or its consumer
/// closed. Errors are reported by returning them; the runner forwards them
/// downstream as metadata.
#[async_trait]
pub trait Processor: Send {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, output: Arc<dyn RowReceiver>) -> Result<()>;
}

/// Build the processor described by `core`
pub fn new_processor(
    ctx: &FlowContext,
    core: &ProcessorCoreSpec,
    mut inputs: Vec<RowSource>,
) -> Result<Box<dyn Processor>> {
    if inputs.len() != core.num_inputs() {
        return Err(FlowError::SetupError(format!(
            "{} processor needs {} inputs, got {}",
            core.name(),
            core.num_inputs(),
            inputs.len()
        )));
    }

    let processor: Box<dyn Processor> = match core {
        ProcessorCoreSpec::Values { rows } => Box::new(Values { rows: rows.clone() }),
        ProcessorCoreSpec::NoOp => Box::new(NoOp {
            input: inputs.remove(0),
        }),
        ProcessorCoreSpec::RegexFilter { column, pattern } => {
            let regex = ctx
                .eval_ctx
                .re_cache
                .get_or_compile(pattern)
                .map_err(|e| FlowError::SetupError(format!("invalid pattern {:?}: {}", pattern, e)))?;
            Box::new(RegexFilter {
                input: inputs.remove(0),
                column: *column,
                regex,
            })
        }
        ProcessorCoreSpec::Sorter { column, descending } => {
            Box::new(Sorter::new(ctx, inputs.remove(0), *column, *descending))
        }
    };
    Ok(processor)
}

/// Run `processor` to completion.
///
/// A failure is pushed to the output as error metadata before the output is
/// closed, so consumers on other nodes learn about it.
pub(crate) async fn run_processor(
    processor: Box<dyn Processor>,
    output: Arc<dyn RowReceiver>,
    log_tag: String,
) -> Result<()> {
    let name = processor.name();
    log::debug!("{} {} processor starting", log_tag, name);
    let result = processor.run(output.clone()).await;
    if let Err(err) = &result {
        log::warn!("{} {} processor failed: {}", log_tag, name, err);
        output
            .push(StreamItem::Meta(ProducerMetadata::from_error(err)))
            .await;
    }
    output.producer_done();
    result
}

/// Emits a fixed set of rows
struct Values {
    rows: Vec<Row>,
}

#[async_trait]
impl Processor for Values {
    fn name(&self) -> &'static str {
        "values"
    }

    async fn run(self: Box<Self>, output: Arc<dyn RowReceiver>) -> Result<()> {
        for row in self.rows {
            if output.push(StreamItem::Row(row)).await == ConsumerStatus::ConsumerClosed {
                break;
            }
        }
        Ok(())
    }
}

/// Forwards its input unchanged
struct NoOp {
    input: RowSource,
}

#[async_trait]
impl Processor for NoOp {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn run(mut self: Box<Self>, output: Arc<dyn RowReceiver>) -> Result<()> {
        while let Some(item) = self.input.next().await {
            if output.push(item).await == ConsumerStatus::ConsumerClosed {
                break;
            }
        }
        Ok(())
    }
}

/// Keeps rows whose string column matches a pattern; NULL and non-string
/// values never match
struct RegexFilter {
    input: RowSource,
    column: usize,
    regex: Arc<Regex>,
}

#[async_trait]
impl Processor for RegexFilter {
    fn name(&self) -> &'static str {
        "regex filter"
    }

    async fn run(mut self: Box<Self>, output: Arc<dyn RowReceiver>) -> Result<()> {
        while let Some(item) = self.input.next().await {
            if let StreamItem::Row(row) = &item {
                let value = row.get(self.column).ok_or_else(|| {
                    FlowError::Internal(format!(
                        "regex filter column {} out of range for row of width {}",
                        self.column,
                        row.len()
                    ))
                })?;
                if !value.as_str().is_some_and(|s| self.regex.is_match(s)) {
                    continue;
                }
            }
            if output.push(item).await == ConsumerStatus::ConsumerClosed {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::flow::row::{row_channel, Datum};

    /// Collect everything a processor emits
    pub(crate) async fn run_to_vec(processor: Box<dyn Processor>) -> (Result<()>, Vec<StreamItem>) {
        let (mut senders, mut source) = row_channel(1);
        let output: Arc<dyn RowReceiver> = senders.remove(0);
        let handle = tokio::spawn(run_processor(processor, output, "[test]".to_string()));
        let mut items = Vec::new();
        while let Some(item) = source.next().await {
            items.push(item);
        }
        (handle.await.unwrap(), items)
    }

    pub(crate) async fn source_of(rows: Vec<Row>) -> RowSource {
        let (mut senders, source) = row_channel(1);
        let sender = senders.remove(0);
        tokio::spawn(async move {
            for row in rows {
                sender.push(StreamItem::Row(row)).await;
            }
            sender.producer_done();
        });
        source
    }

    fn text_row(s: &str) -> Row {
        vec![Datum::String(s.to_string())]
    }

    #[tokio::test]
    async fn test_values_emits_all_rows() {
        let rows = vec![vec![Datum::Int(1)], vec![Datum::Int(2)]];
        let (result, items) = run_to_vec(Box::new(Values { rows: rows.clone() })).await;
        assert!(result.is_ok());
        assert_eq!(
            items,
            rows.into_iter().map(StreamItem::Row).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_regex_filter_keeps_matching_rows() {
        let input = source_of(vec![
            text_row("apple"),
            vec![Datum::Null],
            text_row("banana"),
            text_row("apricot"),
        ])
        .await;
        let filter = RegexFilter {
            input,
            column: 0,
            regex: Arc::new(Regex::new("^ap").unwrap()),
        };
        let (result, items) = run_to_vec(Box::new(filter)).await;
        assert!(result.is_ok());
        assert_eq!(
            items,
            vec![
                StreamItem::Row(text_row("apple")),
                StreamItem::Row(text_row("apricot"))
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_is_forwarded_as_metadata() {
        let input = source_of(vec![text_row("x")]).await;
        let filter = RegexFilter {
            input,
            column: 3,
            regex: Arc::new(Regex::new("x").unwrap()),
        };
        let (result, items) = run_to_vec(Box::new(filter)).await;
        assert!(matches!(result, Err(FlowError::Internal(_))));
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::Meta(meta) => assert!(meta.error.is_some()),
            other => panic!("expected metadata, got {:?}", other),
        }
    }
}
