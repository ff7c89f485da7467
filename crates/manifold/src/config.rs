//! Bus configuration.

use crate::error::BusError;

// ---------------------------------------------------------------------------
// DispatchMode
// ---------------------------------------------------------------------------

/// How far a publication expands beyond its exact declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Exact declared-type matches only.
    Exact,
    /// Exact matches plus supertype matches.
    ExactAndSuper,
    /// Exact, supertype, and variadic matches. The default.
    ExactSuperAndVarArg,
}

impl DispatchMode {
    pub(crate) fn includes_supers(self) -> bool {
        !matches!(self, Self::Exact)
    }

    pub(crate) fn includes_var_args(self) -> bool {
        matches!(self, Self::ExactSuperAndVarArg)
    }
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::ExactSuperAndVarArg
    }
}

// ---------------------------------------------------------------------------
// BusConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`MessageBus`](crate::MessageBus).
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Match expansion applied to every publication.
    pub dispatch_mode: DispatchMode,
    /// Number of asynchronous dispatch workers.
    pub workers: usize,
    /// Capacity of the asynchronous dispatch queue (and of the pooled
    /// holder free-list). Rounded up to a power of two.
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::default(),
            workers: default_workers(),
            queue_capacity: 1024,
        }
    }
}

impl BusConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> BusConfigBuilder {
        BusConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidConfig`] when a value is out of range.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.workers == 0 {
            return Err(BusError::InvalidConfig("workers must be > 0".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(BusError::InvalidConfig(
                "queue_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    (num_cpus::get() / 2).max(2)
}

/// Builder for [`BusConfig`].
#[derive(Debug, Default)]
pub struct BusConfigBuilder {
    dispatch_mode: Option<DispatchMode>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
}

impl BusConfigBuilder {
    /// Sets the dispatch mode.
    #[must_use]
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = Some(mode);
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the dispatch queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidConfig`] when a value is out of range.
    pub fn build(self) -> Result<BusConfig, BusError> {
        let config = BusConfig {
            dispatch_mode: self.dispatch_mode.unwrap_or_default(),
            workers: self.workers.unwrap_or_else(default_workers),
            queue_capacity: self.queue_capacity.unwrap_or(1024),
        };
        config.validate()?;
        Ok(config)
    }
}
