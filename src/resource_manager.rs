//! Resource management

use crate::error::WxError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate various resources
/// to tasks. Resource management is performed using a Tokio Semaphore for each type of resource.
#[derive(Debug, Default)]
pub struct ResourceManager {
    /// Optional semaphore for concurrent dataset file reads.
    file_reads: Option<Semaphore>,

    /// Optional semaphore for memory (bytes) of decoded variables.
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,

    /// Optional semaphore for concurrent queries.
    tasks: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(
        file_read_limit: Option<usize>,
        memory_limit: Option<usize>,
        task_limit: Option<usize>,
    ) -> Self {
        Self {
            file_reads: file_read_limit.map(Semaphore::new),
            memory: memory_limit.map(Semaphore::new),
            total_memory: memory_limit,
            tasks: task_limit.map(Semaphore::new),
        }
    }

    /// Acquire a file read resource.
    pub async fn file_read(&self) -> Result<Option<SemaphorePermit>, WxError> {
        optional_acquire(&self.file_reads, 1).await
    }

    /// Acquire memory resource.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, WxError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(WxError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        optional_acquire(&self.memory, bytes).await
    }

    /// Acquire a task resource.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, WxError> {
        optional_acquire(&self.tasks, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, WxError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
