//! Engine module lifecycle.
//!
//! Modules declare the modules they depend on by name. [`ModuleGraph`]
//! resolves one initialization order from those declarations, initializes
//! in that order, updates in that order and shuts down in reverse.

use crate::config::SettingsStore;
use crate::error::{Error, Result};
use crate::event::EventBus;
use hashbrown::HashMap;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

/// State every module and scene is handed on each lifecycle call.
#[derive(Debug)]
pub struct EngineContext {
    pub events: Arc<EventBus>,
    pub settings: SettingsStore,
}

impl EngineContext {
    /// A context whose settings store publishes on its event bus.
    pub fn new(settings_path: impl Into<PathBuf>) -> Self {
        let events = Arc::new(EventBus::new());
        let settings = SettingsStore::new(settings_path).with_event_bus(Arc::clone(&events));
        Self { events, settings }
    }
}

/// A unit of engine functionality with an explicit lifecycle.
pub trait EngineModule: Send {
    /// Unique module name.
    fn name(&self) -> &'static str;

    /// Names of modules that must be initialized first.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn initialize(&mut self, ctx: &mut EngineContext) -> Result<()>;

    fn update(&mut self, _ctx: &mut EngineContext, _dt: f32) {}

    fn shutdown(&mut self, ctx: &mut EngineContext);
}

/// Order `nodes` so every node follows its dependencies.
///
/// Each node is `(name, dependencies)`. Among nodes that are ready at the
/// same time, the one registered first comes first. Returns indices into
/// `nodes`.
pub fn resolve_order(nodes: &[(&str, &[&str])]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (*name, i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (name, deps)) in nodes.iter().enumerate() {
        for dep in *deps {
            let Some(&d) = index.get(dep) else {
                return Err(Error::UnknownDependency {
                    module: (*name).to_string(),
                    dependency: (*dep).to_string(),
                });
            };
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = (0..nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| nodes[i].0)
            .collect();
        return Err(Error::DependencyCycle(stuck.join(", ")));
    }

    Ok(order)
}

/// Registered modules and their resolved lifecycle order.
#[derive(Default)]
pub struct ModuleGraph {
    modules: Vec<Box<dyn EngineModule>>,
    order: Vec<usize>,
    initialized: bool,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module. Names must be unique; registration closes at initialization.
    pub fn register(&mut self, module: Box<dyn EngineModule>) -> Result<()> {
        if self.initialized {
            return Err(Error::InvalidState(format!(
                "cannot register {} after initialization",
                module.name()
            )));
        }
        if self.modules.iter().any(|m| m.name() == module.name()) {
            return Err(Error::DuplicateModule(module.name().to_string()));
        }
        tracing::debug!("Registered module {}", module.name());
        self.modules.push(module);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Module names in lifecycle order; empty before initialization.
    pub fn order(&self) -> Vec<&'static str> {
        self.order.iter().map(|&i| self.modules[i].name()).collect()
    }

    /// Resolve the order and initialize every module.
    ///
    /// On the first failure the modules already initialized are shut down
    /// in reverse order and the graph stays uninitialized.
    pub fn initialize(&mut self, ctx: &mut EngineContext) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let nodes: Vec<(&str, &[&str])> = self
            .modules
            .iter()
            .map(|m| (m.name(), m.dependencies()))
            .collect();
        let order = resolve_order(&nodes).map_err(|e| {
            tracing::error!("Failed to resolve module order: {e}");
            e
        })?;

        for (position, &i) in order.iter().enumerate() {
            let module = &mut self.modules[i];
            tracing::info!("Initializing module {}", module.name());
            if let Err(e) = module.initialize(ctx) {
                let name = module.name();
                tracing::error!("Module {name} failed to initialize: {e}");
                for &done in order[..position].iter().rev() {
                    let module = &mut self.modules[done];
                    tracing::info!("Rolling back module {}", module.name());
                    module.shutdown(ctx);
                }
                return Err(Error::ModuleInit {
                    module: name.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        self.order = order;
        self.initialized = true;
        Ok(())
    }

    /// Update every module in order. No-op before initialization.
    pub fn update(&mut self, ctx: &mut EngineContext, dt: f32) {
        if !self.initialized {
            return;
        }
        for &i in &self.order {
            self.modules[i].update(ctx, dt);
        }
    }

    /// Shut every module down in reverse order.
    pub fn shutdown(&mut self, ctx: &mut EngineContext) {
        if !self.initialized {
            return;
        }
        for &i in self.order.iter().rev() {
            let module = &mut self.modules[i];
            tracing::info!("Shutting down module {}", module.name());
            module.shutdown(ctx);
        }
        self.initialized = false;
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(|m| m.name()).collect();
        f.debug_struct("ModuleGraph")
            .field("modules", &names)
            .field("initialized", &self.initialized)
            .finish()
    }
}
