use crate::error::InvalidConfig;

/// Configuration for the adaptive chunk allocator.
#[derive(Clone, Debug)]
pub struct AllocConfig {
    /// Smallest chunk the allocator will hand out.
    pub min_alloc: usize,
    /// Largest chunk the allocator will hand out.
    pub max_alloc: usize,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            min_alloc: 4096,
            max_alloc: 65536,
        }
    }
}

/// Configuration for backpressure pipes.
#[derive(Clone, Debug)]
pub struct PipeConfig {
    /// Soft capacity bound in bytes. A single write may transiently exceed
    /// it; the producer observes `false` and waits for the drain signal.
    pub capacity: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self { capacity: 65536 }
    }
}

/// Configuration for affinity contexts.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Initial task-slot capacity. The slab grows past this on demand.
    pub task_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { task_capacity: 256 }
    }
}

/// Top-level configuration for the transport library.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Adaptive allocator bounds.
    pub alloc: AllocConfig,
    /// Pipe capacity settings.
    pub pipe: PipeConfig,
    /// Context/executor settings.
    pub context: ContextConfig,
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.alloc.min_alloc == 0 {
            return Err(InvalidConfig("alloc.min_alloc must be > 0".into()));
        }
        if self.alloc.min_alloc > self.alloc.max_alloc {
            return Err(InvalidConfig(
                "alloc.min_alloc must be <= alloc.max_alloc".into(),
            ));
        }
        if self.pipe.capacity == 0 {
            return Err(InvalidConfig("pipe.capacity must be > 0".into()));
        }
        if self.context.task_capacity == 0 {
            return Err(InvalidConfig("context.task_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use wireline::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .alloc_bounds(4096, 65536)
///     .pipe_capacity(32768)
///     .task_capacity(512)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Allocator settings ───────────────────────────────────────────

    /// Set the smallest and largest chunk sizes the allocator hands out.
    pub fn alloc_bounds(mut self, min: usize, max: usize) -> Self {
        self.config.alloc.min_alloc = min;
        self.config.alloc.max_alloc = max;
        self
    }

    // ── Pipe settings ────────────────────────────────────────────────

    /// Set the soft capacity bound for pipes, in bytes.
    pub fn pipe_capacity(mut self, bytes: usize) -> Self {
        self.config.pipe.capacity = bytes;
        self
    }

    // ── Context settings ─────────────────────────────────────────────

    /// Set the initial task-slot capacity per context.
    pub fn task_capacity(mut self, n: usize) -> Self {
        self.config.context.task_capacity = n;
        self
    }

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Get mutable access to the underlying config for fields not covered
    /// by builder methods.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, InvalidConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
