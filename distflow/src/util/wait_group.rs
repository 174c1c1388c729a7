// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Counter that can be awaited until it drops to zero

use tokio::sync::watch;

#[derive(Debug)]
pub struct WaitGroup {
    tx: watch::Sender<usize>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    pub fn add(&self, n: usize) {
        self.tx.send_modify(|count| *count += n);
    }

    pub fn done(&self) {
        self.tx.send_modify(|count| {
            if *count == 0 {
                log::error!("wait group released more times than it was added to");
            } else {
                *count -= 1;
            }
        });
    }

    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    /// Resolves when the count is zero
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}
