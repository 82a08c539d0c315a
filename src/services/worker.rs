//! Fixed pool of background threads draining a queue of document ids.

use crate::services::pipeline::Pipeline;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Handle for the worker pool.
///
/// `submit` is fire-and-forget. `shutdown` (also run on drop) closes the
/// queue and waits for the workers to finish what was already queued.
pub struct WorkQueue {
    sender: Mutex<Option<Sender<i64>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkQueue {
    pub fn start(pipeline: Arc<Pipeline>, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<i64>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = workers.max(1);

        let handles = (0..workers)
            .filter_map(|n| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                std::thread::Builder::new()
                    .name(format!("pipeline-worker-{}", n))
                    .spawn(move || worker_loop(&pipeline, &rx))
                    .map_err(|e| tracing::error!(error = %e, "could not spawn pipeline worker"))
                    .ok()
            })
            .collect::<Vec<_>>();
        tracing::info!(workers = handles.len(), "pipeline workers started");

        WorkQueue {
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        }
    }

    /// Queue a document. Returns `false` once the queue is shut down.
    pub fn submit(&self, document_id: i64) -> bool {
        let Ok(guard) = self.sender.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(tx) => tx.send(document_id).is_ok(),
            None => false,
        }
    }

    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        let handles = match self.handles.lock() {
            Ok(mut h) => std::mem::take(&mut *h),
            Err(_) => return,
        };
        for h in handles {
            let _ = h.join();
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(pipeline: &Pipeline, rx: &Mutex<Receiver<i64>>) {
    loop {
        // Hold the lock only while waiting for the next id.
        let next = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(document_id) = next else {
            break;
        };
        match pipeline.process_document(document_id) {
            Ok(status) => tracing::debug!(document_id, %status, "document done"),
            Err(e) => tracing::error!(document_id, error = %e, "pipeline error"),
        }
    }
    tracing::debug!("pipeline worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::services::notifier::BroadcastNotifier;
    use crate::services::traits::OcrEngine;
    use crate::types::{DocumentStatus, OcrEntity, OcrResult};
    use std::path::Path;

    struct NameOnlyOcr;

    impl OcrEngine for NameOnlyOcr {
        fn process(&self, _path: &Path, _mime_type: &str) -> OcrResult {
            OcrResult {
                success: true,
                entities: vec![OcrEntity::new("patient name", "Jane Doe", 0.9)],
                ..Default::default()
            }
        }
    }

    #[test]
    fn queued_documents_are_drained_on_shutdown() {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let notifier = Arc::new(BroadcastNotifier::new());
        let updates = notifier.subscribe();
        let pipeline = Arc::new(Pipeline::new(Arc::new(NameOnlyOcr), db.clone(), db.clone(), notifier));
        let queue = WorkQueue::start(pipeline, 3);

        let ids: Vec<i64> = (0..6)
            .map(|i| {
                db.create_document(&format!("{}.pdf", i), "/tmp/x.pdf", "application/pdf")
                    .unwrap()
            })
            .collect();
        for &id in &ids {
            assert!(queue.submit(id));
        }
        // the same id twice is processed once
        assert!(queue.submit(ids[0]));
        queue.shutdown();

        for id in ids {
            assert_eq!(db.get_document(id).unwrap().unwrap().status, DocumentStatus::Completed);
        }
        let completions = updates
            .try_iter()
            .filter(|u| u.status == DocumentStatus::Completed)
            .count();
        assert_eq!(completions, 6);
        assert!(!queue.submit(99));
    }
}
