//! Test harness wiring the doubles together.

use crate::allocator::MockAllocator;
use crate::device::{LiveObjects, MockDevice};
use std::sync::{Arc, Once};
use thiserror::Error;
use trylauncher_gpu::{GpuError, ResourceManager, Transfer};

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Device misuse: {}", .0.join("; "))]
    Violations(Vec<String>),
    #[error("Leaked device objects: {0:?}")]
    LeakedObjects(LiveObjects),
    #[error("Leaked allocations: {0}")]
    LeakedAllocations(usize),
}

pub type Result<T> = std::result::Result<T, TestError>;

static LOGGING: Once = Once::new();

/// Route `tracing` output through the test writer. Honors `RUST_LOG`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        // Another harness in the same binary may have installed one already.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Mock device, allocator and resource manager, ready for use.
pub struct Harness {
    pub device: Arc<MockDevice>,
    /// Observer sharing state with the allocator inside `resources`.
    pub allocator: MockAllocator,
    pub resources: ResourceManager<MockDevice, MockAllocator>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_device(MockDevice::new())
    }

    pub fn with_device(device: MockDevice) -> Self {
        init_test_logging();
        let device = Arc::new(device);
        let allocator = MockAllocator::new();
        let resources = ResourceManager::new(Arc::clone(&device), allocator.clone());
        Self {
            device,
            allocator,
            resources,
        }
    }

    /// A transfer helper on the harness device.
    pub fn transfer(&self) -> Result<Transfer<MockDevice>> {
        Ok(Transfer::new(Arc::clone(&self.device))?)
    }

    /// Fail if the device recorded any misuse.
    pub fn check_violations(&self) -> Result<()> {
        let violations = self.device.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(TestError::Violations(violations))
        }
    }

    /// Fail on misuse, live device objects or live allocations.
    pub fn check_clean(&self) -> Result<()> {
        self.check_violations()?;
        let live = self.device.live();
        if live.total() > 0 {
            return Err(TestError::LeakedObjects(live));
        }
        let allocations = self.allocator.live_count();
        if allocations > 0 {
            return Err(TestError::LeakedAllocations(allocations));
        }
        Ok(())
    }
}
