use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ToolError;
use crate::types::Tool;

/// RAII guard that releases a tool slot when dropped.
///
/// Callers must hold this until the corresponding conversion finishes.
pub struct Permit {
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
    tool: Tool,
}

impl Permit {
    pub fn tool(&self) -> Tool {
        self.tool
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").field("tool", &self.tool).finish()
    }
}

/// Bounds how many invocations of each external tool run at once.
///
/// Each tool is registered with a maximum concurrency. [`Self::acquire`]
/// waits for a free slot, which is what turns the job runner into a queue;
/// [`Self::try_acquire`] fails fast with [`ToolError::Busy`].
///
/// Tools must be registered via [`Self::register`] before the manager is
/// cloned. After cloning the semaphore map is immutable and all reads are
/// lock-free.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    semaphores: Arc<HashMap<Tool, (usize, Arc<Semaphore>)>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            semaphores: Arc::new(HashMap::new()),
        }
    }

    /// Register (or replace) a tool with the given concurrency capacity.
    ///
    /// A capacity of zero is raised to one so the tool can make progress.
    pub fn register(&mut self, tool: Tool, capacity: usize) {
        debug_assert!(
            Arc::strong_count(&self.semaphores) == 1,
            "register called after ResourceManager was cloned; \
             other clones will not see the new tool"
        );
        let capacity = capacity.max(1);
        Arc::make_mut(&mut self.semaphores)
            .insert(tool, (capacity, Arc::new(Semaphore::new(capacity))));
    }

    /// Wait for a slot on `tool`.
    pub async fn acquire(&self, tool: Tool) -> Result<Permit, ToolError> {
        let semaphore = self.semaphore(tool)?;
        semaphore
            .acquire_owned()
            .await
            .map(|permit| Permit { permit, tool })
            .map_err(|_| ToolError::Busy { tool })
    }

    /// Take a slot on `tool` if one is free right now.
    pub fn try_acquire(&self, tool: Tool) -> Result<Permit, ToolError> {
        let semaphore = self.semaphore(tool)?;
        semaphore
            .try_acquire_owned()
            .map(|permit| Permit { permit, tool })
            .map_err(|_| ToolError::Busy { tool })
    }

    /// Free slots on `tool`; `None` when the tool is not registered.
    pub fn available(&self, tool: Tool) -> Option<usize> {
        self.semaphores
            .get(&tool)
            .map(|(_, semaphore)| semaphore.available_permits())
    }

    /// Configured capacity of `tool`.
    pub fn capacity(&self, tool: Tool) -> Option<usize> {
        self.semaphores.get(&tool).map(|(capacity, _)| *capacity)
    }

    fn semaphore(&self, tool: Tool) -> Result<Arc<Semaphore>, ToolError> {
        self.semaphores
            .get(&tool)
            .map(|(_, semaphore)| Arc::clone(semaphore))
            .ok_or(ToolError::NotRegistered { tool })
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}
