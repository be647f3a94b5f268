//! Shared runtime environment.
//!
//! An `Env` bundles the node factory, the worker pool, and the table of
//! registered modules. It is created once by the caller and shared by
//! every graph built from it; dropping it waits for all queued tasks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use flow_core::{flow_sched, register_numeric_conversions, FlowError};

use crate::factory::NodeFactory;
use crate::module::Module;
use crate::pool::TaskPool;

/// Configuration for the runtime environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Number of worker threads in the pool.
    ///
    /// Zero means one worker per logical CPU.
    ///
    /// Default: 10
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl EnvConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

fn default_workers() -> usize {
    10
}

/// The environment all graphs run in.
pub struct Env {
    factory: Arc<NodeFactory>,
    pool: TaskPool,
    modules: Mutex<HashMap<String, Arc<dyn Module>>>,
}

impl Env {
    /// Creates an environment with the default configuration.
    pub fn new(factory: Arc<NodeFactory>) -> Arc<Self> {
        Self::with_config(factory, EnvConfig::default())
    }

    /// Creates an environment with the given configuration and registers
    /// the default conversions on the factory: the complete numeric family
    /// interconverts out of the box.
    pub fn with_config(factory: Arc<NodeFactory>, config: EnvConfig) -> Arc<Self> {
        register_numeric_conversions(factory.conversions());

        let workers = config.effective_workers();
        flow_sched!(debug, workers, "creating environment");

        Arc::new(Self {
            factory,
            pool: TaskPool::new(workers),
            modules: Mutex::new(HashMap::new()),
        })
    }

    /// The node factory.
    pub fn factory(&self) -> &Arc<NodeFactory> {
        &self.factory
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Enqueues a unit of work on the pool.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        self.pool.add_task(task);
    }

    /// Enqueues one task per index in `[first, last)`.
    pub fn add_sequence_task(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64) + Send + Sync + 'static,
    ) {
        self.pool.add_sequence_task(first, last, task);
    }

    /// Enqueues a partitioned loop, one index at a time.
    pub fn add_loop_task(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64) + Send + Sync + 'static,
        num_blocks: usize,
    ) {
        self.pool.add_loop_task(first, last, task, num_blocks);
    }

    /// Enqueues a partitioned loop, one range at a time.
    pub fn add_blocks_task(
        &self,
        first: u64,
        last: u64,
        task: impl Fn(u64, u64) + Send + Sync + 'static,
        num_blocks: usize,
    ) {
        self.pool.add_blocks_task(first, last, task, num_blocks);
    }

    /// Blocks until the pool is idle.
    pub fn wait(&self) {
        self.pool.wait();
    }

    /// Reads a process environment variable; empty string when absent.
    pub fn get_var(&self, name: &str) -> String {
        std::env::var(name).unwrap_or_default()
    }

    /// Registers a module: runs its registration entry point and records
    /// it under its manifest name. Re-registering a name unregisters the
    /// previous module first.
    pub fn register_module(&self, module: Arc<dyn Module>) -> Result<(), FlowError> {
        let name = module.manifest().name.clone();
        if name.is_empty() {
            return Err(FlowError::Module {
                message: "module manifest has an empty name".to_string(),
            });
        }

        let mut modules = self.modules.lock();
        if let Some(previous) = modules.remove(&name) {
            flow_sched!(debug, module = %name, "replacing loaded module");
            previous.unregister(&self.factory);
        }

        module.register(&self.factory);
        flow_sched!(debug, module = %name, version = %module.manifest().version, "module registered");
        modules.insert(name, module);
        Ok(())
    }

    /// Unregisters a module by name. Returns whether a module was removed.
    pub fn unregister_module(&self, name: &str) -> bool {
        let removed = self.modules.lock().remove(name);
        match removed {
            Some(module) => {
                module.unregister(&self.factory);
                flow_sched!(debug, module = %name, "module unregistered");
                true
            }
            None => false,
        }
    }

    /// Names of the registered modules.
    pub fn module_names(&self) -> Vec<String> {
        self.modules.lock().keys().cloned().collect()
    }
}
