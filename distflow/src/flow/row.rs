// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rows, metadata, and the channels that carry them between processors

use crate::error::{FlowError, RemoteError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::sync::mpsc;

/// Items buffered per channel before producers block
pub const ROW_CHANNEL_BUFFER_SIZE: usize = 16;

/// A single value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Datum {
    /// Approximate in-memory footprint, used for memory accounting
    pub fn size(&self) -> usize {
        let inline = std::mem::size_of::<Datum>();
        match self {
            Datum::String(s) => inline + s.len(),
            Datum::Bytes(b) => inline + b.len(),
            _ => inline,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int(_) | Datum::Float(_) => 2,
            Datum::String(_) => 3,
            Datum::Bytes(_) => 4,
        }
    }

    /// Total order used for sorting: NULL first, numbers compared by value
    pub fn total_cmp(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::Float(a), Datum::Float(b)) => a.total_cmp(b),
            (Datum::Int(a), Datum::Float(b)) => (*a as f64).total_cmp(b),
            (Datum::Float(a), Datum::Int(b)) => a.total_cmp(&(*b as f64)),
            (Datum::String(a), Datum::String(b)) => a.cmp(b),
            (Datum::Bytes(a), Datum::Bytes(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Float(x) => write!(f, "{}", x),
            Datum::String(s) => f.write_str(s),
            Datum::Bytes(b) => write!(f, "\\x{}", b.iter().map(|x| format!("{:02x}", x)).collect::<String>()),
        }
    }
}

pub type Row = Vec<Datum>;

pub fn row_size(row: &Row) -> usize {
    std::mem::size_of::<Row>() + row.iter().map(Datum::size).sum::<usize>()
}

/// Out-of-band information travelling with the rows of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProducerMetadata {
    pub error: Option<RemoteError>,
    pub trace: Vec<String>,
}

impl ProducerMetadata {
    pub fn from_error(error: &FlowError) -> Self {
        Self {
            error: Some(RemoteError::from(error)),
            trace: Vec::new(),
        }
    }
}

/// One element of a row stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamItem {
    Row(Row),
    Meta(ProducerMetadata),
}

/// Response of a consumer to a pushed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    NeedMoreRows,
    /// The consumer is gone; the producer should stop
    ConsumerClosed,
}

/// The consuming end of a row stream
#[async_trait]
pub trait RowReceiver: Send + Sync {
    async fn push(&self, item: StreamItem) -> ConsumerStatus;

    /// Signal that this producer will push nothing more
    fn producer_done(&self);
}

/// Producer side of a bounded channel. Each producer of a merged input has
/// its own `RowChannel`; the source ends once all of them are done.
pub struct RowChannel {
    tx: Mutex<Option<mpsc::Sender<StreamItem>>>,
}

#[async_trait]
impl RowReceiver for RowChannel {
    async fn push(&self, item: StreamItem) -> ConsumerStatus {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => match tx.send(item).await {
                Ok(()) => ConsumerStatus::NeedMoreRows,
                Err(_) => ConsumerStatus::ConsumerClosed,
            },
            None => {
                log::error!("push after producer_done on row channel");
                ConsumerStatus::ConsumerClosed
            }
        }
    }

    fn producer_done(&self) {
        self.tx.lock().take();
    }
}

/// Consumer side of a row channel
pub struct RowSource {
    rx: mpsc::Receiver<StreamItem>,
}

impl RowSource {
    /// Next item, or `None` once every producer is done
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }
}

/// Create a channel fed by `producers` independent producers
pub fn row_channel(producers: usize) -> (Vec<std::sync::Arc<RowChannel>>, RowSource) {
    let (tx, rx) = mpsc::channel(ROW_CHANNEL_BUFFER_SIZE);
    let senders = (0..producers)
        .map(|_| {
            std::sync::Arc::new(RowChannel {
                tx: Mutex::new(Some(tx.clone())),
            })
        })
        .collect();
    (senders, RowSource { rx })
}
