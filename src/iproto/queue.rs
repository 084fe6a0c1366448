// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-capacity request queue and the worker task pool draining it.
//! The ring buffer itself is `tokio::sync::mpsc`'s bounded channel:
//! `push` backs off exactly when the ring would
//! overflow, and `pop` is FIFO by construction, so head/tail bookkeeping
//! never needs to be reimplemented by hand.
//!
//! Workers are cooperative tasks parked on `recv().await` when the queue
//! is empty — the async equivalent of the source's worker free-list,
//! since a parked task costs nothing until the queue has more work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::iproto::request::Request;
use crate::iproto::session::ConnId;

/// A decoded request bound to the connection it arrived on.
pub struct QueuedRequest {
    pub conn_id: ConnId,
    pub request: Request,
}

type Processor = Arc<dyn Fn(QueuedRequest) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Producer half of the request ring.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<QueuedRequest>,
}

impl RequestQueue {
    /// Builds a queue with `capacity` slots (`IPROTO_REQUEST_QUEUE_SIZE`,
    /// default 2048) and the receiving half used to start a worker pool.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueues a request. Resolves once a slot is free — the ring's
    /// back-pressure against a saturated connection/processor pipeline.
    pub async fn push(&self, item: QueuedRequest) -> Result<(), QueuedRequest> {
        self.tx.send(item).await.map_err(|e| e.0)
    }
}

/// Spawns `pool_size` cooperative worker tasks draining `rx`, each
/// calling `processor` for every request it pops. Workers loop until the
/// sender side (and every `RequestQueue` clone) is dropped.
pub struct WorkerPool;

impl WorkerPool {
    pub fn spawn(pool_size: usize, rx: mpsc::Receiver<QueuedRequest>, processor: Processor) -> Self {
        let rx = Arc::new(AsyncMutex::new(rx));
        for _ in 0..pool_size.max(1) {
            let rx = rx.clone();
            let processor = processor.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match item {
                        Some(item) => processor(item).await,
                        None => break,
                    }
                }
            });
        }
        WorkerPool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::iproto::wire::RequestType;

    fn dummy_request() -> Request {
        Request {
            request_type: RequestType::Ping,
            sync: 0,
            schema_version: None,
            body: None,
            frame_len: 0,
        }
    }

    #[tokio::test]
    async fn requests_are_processed_in_push_order_per_single_worker() {
        let (queue, rx) = RequestQueue::new(16);
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let order_clone = order.clone();
        let processor: Processor = Arc::new(move |item: QueuedRequest| {
            let order = order_clone.clone();
            Box::pin(async move {
                order.lock().await.push(item.request.sync);
            })
        });
        let _pool = WorkerPool::spawn(1, rx, processor);

        for sync in 0..5 {
            let mut req = dummy_request();
            req.sync = sync;
            queue.push(QueuedRequest { conn_id: 1, request: req }).await.expect("room in queue");
        }

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn push_fails_once_all_senders_and_receiver_are_gone() {
        let (queue, rx) = RequestQueue::new(2);
        drop(rx);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let _processor: Processor = Arc::new(move |_item: QueuedRequest| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        });
        let result = queue.push(QueuedRequest { conn_id: 1, request: dummy_request() }).await;
        assert!(result.is_err());
    }
}
