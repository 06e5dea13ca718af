//! Command buffer management.

use crate::device::{DeviceContext, QueueRole};
use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// Parameters for [`CommandPool::new`].
#[derive(Debug, Clone, Copy)]
pub struct CommandPoolDesc {
    /// Queue family the pool's buffers are submitted to.
    pub queue_family: u32,
    /// Pool creation flags.
    pub flags: vk::CommandPoolCreateFlags,
    /// Primary buffers allocated up front.
    pub initial_buffers: u32,
}

impl Default for CommandPoolDesc {
    fn default() -> Self {
        Self {
            queue_family: 0,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            initial_buffers: 0,
        }
    }
}

/// One queue submission.
///
/// `wait_semaphores` and `wait_stages` are paired index by index and must
/// have the same length. With no `queue` the graphics queue is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitBatch<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: vk::Fence,
    pub queue: Option<vk::Queue>,
}

impl SubmitBatch<'_> {
    /// Check the batch before it is handed to the driver.
    pub fn validate(&self) -> Result<()> {
        if self.command_buffers.is_empty() {
            return Err(GpuError::SubmitValidation(
                "no command buffers to submit".to_string(),
            ));
        }
        if self.wait_semaphores.len() != self.wait_stages.len() {
            return Err(GpuError::SubmitValidation(format!(
                "{} wait semaphores but {} wait stages",
                self.wait_semaphores.len(),
                self.wait_stages.len()
            )));
        }
        Ok(())
    }
}

/// Command pool bound to one queue family, tracking the buffers it hands out.
pub struct CommandPool<D: DeviceContext> {
    device: Arc<D>,
    pool: vk::CommandPool,
    queue_family: u32,
    buffers: Vec<vk::CommandBuffer>,
}

impl<D: DeviceContext> CommandPool<D> {
    /// Create a pool and allocate `desc.initial_buffers` primary buffers.
    ///
    /// If the initial allocation fails the pool is destroyed again.
    pub fn new(device: Arc<D>, desc: CommandPoolDesc) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(desc.queue_family)
            .flags(desc.flags);

        let pool = unsafe { device.create_command_pool(&create_info) }.map_err(|e| {
            tracing::error!("Failed to create command pool: {e}");
            e
        })?;

        let mut this = Self {
            device,
            pool,
            queue_family: desc.queue_family,
            buffers: Vec::new(),
        };

        if desc.initial_buffers > 0 {
            // Dropping `this` destroys the pool.
            this.allocate_many(vk::CommandBufferLevel::PRIMARY, desc.initial_buffers)?;
        }

        tracing::debug!(
            "Created command pool for queue family {} with {} buffers",
            desc.queue_family,
            desc.initial_buffers
        );

        Ok(this)
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Buffers currently allocated from this pool, in allocation order.
    pub fn buffers(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    /// Whether the pool has not been destroyed.
    pub fn is_initialized(&self) -> bool {
        self.pool != vk::CommandPool::null()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(GpuError::NotInitialized("command pool"))
        }
    }

    /// Allocate a single command buffer.
    pub fn allocate(&mut self, level: vk::CommandBufferLevel) -> Result<vk::CommandBuffer> {
        let buffers = self.allocate_many(level, 1)?;
        buffers
            .first()
            .copied()
            .ok_or_else(|| GpuError::Other("driver returned no command buffer".to_string()))
    }

    /// Allocate multiple command buffers.
    pub fn allocate_many(
        &mut self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        self.ensure_initialized()?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
            tracing::error!("Failed to allocate {count} command buffers: {e}");
            e
        })?;

        self.buffers.extend_from_slice(&buffers);
        Ok(buffers)
    }

    /// Free a command buffer allocated from this pool.
    pub fn free(&mut self, cmd: vk::CommandBuffer) {
        self.free_many(&[cmd]);
    }

    /// Free several command buffers. Buffers this pool did not hand out are ignored.
    pub fn free_many(&mut self, buffers: &[vk::CommandBuffer]) {
        if !self.is_initialized() {
            return;
        }

        let owned: Vec<_> = buffers
            .iter()
            .copied()
            .filter(|cmd| self.buffers.contains(cmd))
            .collect();
        if owned.is_empty() {
            return;
        }

        unsafe { self.device.free_command_buffers(self.pool, &owned) };
        self.buffers.retain(|cmd| !owned.contains(cmd));
    }

    /// Reset every buffer allocated from the pool.
    ///
    /// None of the pool's buffers may be pending on the GPU.
    pub fn reset(&self, flags: vk::CommandPoolResetFlags) -> Result<()> {
        self.ensure_initialized()?;
        unsafe { self.device.reset_command_pool(self.pool, flags) }
    }

    /// Reset one buffer. Requires `RESET_COMMAND_BUFFER` on the pool.
    pub fn reset_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.ensure_initialized()?;
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    /// Begin recording a command buffer.
    pub fn begin(&self, cmd: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> Result<()> {
        self.ensure_initialized()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
    }

    /// End recording a command buffer.
    pub fn end(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.ensure_initialized()?;
        unsafe { self.device.end_command_buffer(cmd) }
    }

    /// Submit a batch. A batch failing [`SubmitBatch::validate`] never reaches the queue.
    pub fn submit(&self, batch: &SubmitBatch<'_>) -> Result<()> {
        self.ensure_initialized()?;
        batch.validate().map_err(|e| {
            tracing::error!("{e}");
            e
        })?;

        let queue = batch
            .queue
            .unwrap_or_else(|| self.device.queue(QueueRole::Graphics));

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(batch.command_buffers)
            .wait_semaphores(batch.wait_semaphores)
            .wait_dst_stage_mask(batch.wait_stages)
            .signal_semaphores(batch.signal_semaphores);

        unsafe { self.device.queue_submit(queue, &[submit_info], batch.fence) }.map_err(|e| {
            tracing::error!("Queue submission failed: {e}");
            e
        })
    }

    /// Allocate a primary buffer and begin it for one-time submission.
    pub fn begin_single_time_commands(&mut self) -> Result<vk::CommandBuffer> {
        let cmd = self.allocate(vk::CommandBufferLevel::PRIMARY)?;
        if let Err(e) = self.begin(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT) {
            self.free(cmd);
            return Err(e);
        }
        Ok(cmd)
    }

    /// End `cmd`, submit it to the graphics queue and wait for the queue to idle.
    ///
    /// The buffer is freed whether or not submission succeeds.
    pub fn end_single_time_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let result = self.submit_and_wait(cmd);
        self.free(cmd);
        result
    }

    fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.end(cmd)?;

        let queue = self.device.queue(QueueRole::Graphics);
        let command_buffers = [cmd];
        self.submit(&SubmitBatch {
            command_buffers: &command_buffers,
            queue: Some(queue),
            ..SubmitBatch::default()
        })?;

        unsafe { self.device.queue_wait_idle(queue) }
    }

    /// Record with `f` into a one-time buffer and execute it synchronously.
    pub fn execute_single_time<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let cmd = self.begin_single_time_commands()?;
        f(cmd);
        self.end_single_time_commands(cmd)
    }

    /// Free all buffers and destroy the pool.
    pub fn destroy(&mut self) {
        if !self.is_initialized() {
            return;
        }

        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("Device wait idle failed before command pool teardown: {e}");
        }

        unsafe {
            if !self.buffers.is_empty() {
                self.device.free_command_buffers(self.pool, &self.buffers);
            }
            self.device.destroy_command_pool(self.pool);
        }
        self.buffers.clear();
        self.pool = vk::CommandPool::null();
    }
}

impl<D: DeviceContext> Drop for CommandPool<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_wait_lists_are_rejected() {
        let cmd = [vk::CommandBuffer::null()];
        let waits = [vk::Semaphore::null(), vk::Semaphore::null()];
        let stages = [vk::PipelineStageFlags::TRANSFER];

        let batch = SubmitBatch {
            command_buffers: &cmd,
            wait_semaphores: &waits,
            wait_stages: &stages,
            ..SubmitBatch::default()
        };
        assert!(matches!(
            batch.validate(),
            Err(GpuError::SubmitValidation(_))
        ));
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(SubmitBatch::default().validate().is_err());
    }

    #[test]
    fn paired_wait_lists_pass() {
        let cmd = [vk::CommandBuffer::null()];
        let waits = [vk::Semaphore::null()];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        let batch = SubmitBatch {
            command_buffers: &cmd,
            wait_semaphores: &waits,
            wait_stages: &stages,
            ..SubmitBatch::default()
        };
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn default_pool_allows_buffer_reset() {
        let desc = CommandPoolDesc::default();
        assert!(desc
            .flags
            .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER));
        assert_eq!(desc.initial_buffers, 0);
    }
}
