use std::sync::Arc;
use std::thread::JoinHandle;

use crate::buffer::Shared;
use crate::error::{Error, Result};
use crate::key::BufferKey;
use crate::lane::TransferState;

/// Spawn the worker that drains the memory lane to disk until shutdown.
pub(crate) fn spawn<K: BufferKey>(shared: Arc<Shared<K>>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("spillbuf-transfer".into())
        .spawn(move || match drain(&shared) {
            Ok(()) | Err(Error::Abort) => {
                tracing::debug!("transfer worker stopped");
            }
            Err(error) => {
                tracing::error!(error = %error, "transfer worker failed");
                shared.record_failure(error);
            }
        })?;
    Ok(handle)
}

// Move the oldest untransferred entry to disk, one at a time, oldest first.
fn drain<K: BufferKey>(shared: &Shared<K>) -> Result<()> {
    loop {
        let mut memory = shared.memory.lane.lock()?;
        memory = shared.memory.available.wait_while(memory, |lane| {
            shared.is_running()
                && !lane
                    .index
                    .iter()
                    .any(|e| e.transfer == TransferState::NotStarted)
        })?;
        if !shared.is_running() {
            return Ok(());
        }
        let Some(entry) = memory
            .index
            .iter_mut()
            .find(|e| e.transfer == TransferState::NotStarted)
        else {
            continue;
        };
        entry.transfer = TransferState::Started;
        let key = entry.key.clone();
        let value = entry.value.clone();

        // Take the disk lane before releasing the memory lane, so a delete
        // racing this hand-off cannot look for a disk entry that does not
        // exist yet.
        let disk = shared.disk.lane.lock()?;
        drop(memory);
        shared.store_on_disk(&key, &value, disk)?;

        let mut memory = shared.memory.lane.lock()?;
        if let Some(entry) = memory.index.iter_mut().find(|e| e.key == key) {
            // A racing overwrite may have replaced the entry; only the one
            // this pass started may advance.
            if entry.transfer == TransferState::Started {
                entry.transfer = TransferState::Completed;
            }
        }
        drop(memory);
        shared.memory.available.notify_all();
    }
}
