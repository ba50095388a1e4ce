/*
* Licensed to Elasticsearch B.V. under one or more contributor
* license agreements. See the NOTICE file distributed with
* this work for additional information regarding copyright
* ownership. Elasticsearch B.V. licenses this file to you under
* the Apache License, Version 2.0 (the "License"); you may
* not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*  http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing,
* software distributed under the License is distributed on an
* "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
* KIND, either express or implied.  See the License for the
* specific language governing permissions and limitations
* under the License.
*/

//! Background deletion of node tract files. A merge consumes its two children's
//! stored tracts and schedules their removal; both readers are off the frontier
//! by then, so no later reader exists. Failures are logged, never fatal. The
//! builder drains the worker before replacing anything on disk.

use crossbeam_channel::{unbounded, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tractcloud::TractStore;

pub(crate) struct TractDeleter {
    sender: Option<Sender<usize>>,
    worker: Option<JoinHandle<()>>,
}

impl TractDeleter {
    pub(crate) fn new(store: Arc<dyn TractStore>) -> TractDeleter {
        let (sender, receiver) = unbounded::<usize>();
        let worker = std::thread::spawn(move || {
            while let Ok(id) = receiver.recv() {
                if let Err(e) = store.delete_node_tract(id) {
                    log::warn!("could not delete node tract {}: {}", id, e);
                }
            }
        });
        TractDeleter {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Queues a node tract for removal
    pub(crate) fn schedule(&self, id: usize) {
        if let Some(sender) = &self.sender {
            if sender.send(id).is_err() {
                log::warn!("delete worker is gone, node tract {} left behind", id);
            }
        }
    }

    /// Blocks until every scheduled deletion has run
    pub(crate) fn drain(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("delete worker ended abnormally");
            }
        }
    }
}

impl Drop for TractDeleter {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractcloud::{CompactTract, RamTractStore};

    #[test]
    fn drains_all_scheduled_deletions() {
        let store = Arc::new(RamTractStore::new(vec![]));
        for id in 0..16 {
            store
                .write_node_tract(id, &CompactTract::new(vec![0.5]))
                .unwrap();
        }
        let mut deleter = TractDeleter::new(store.clone());
        for id in 0..16 {
            deleter.schedule(id);
        }
        deleter.drain();
        for id in 0..16 {
            assert!(store.read_node_tract(id).is_err());
        }
    }

    #[test]
    fn missing_files_do_not_panic() {
        let store = Arc::new(RamTractStore::new(vec![]));
        let mut deleter = TractDeleter::new(store);
        deleter.schedule(42);
        deleter.drain();
    }
}
