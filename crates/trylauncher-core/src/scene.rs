//! Named scenes and a navigation history over them.

use crate::error::{Error, Result};
use crate::module::EngineContext;
use hashbrown::HashMap;

/// A screen of the launcher.
pub trait Scene: Send {
    /// Called when the scene becomes current.
    fn enter(&mut self, _ctx: &mut EngineContext) -> Result<()> {
        Ok(())
    }

    /// Called when another scene replaces this one.
    fn exit(&mut self, _ctx: &mut EngineContext) {}

    fn update(&mut self, ctx: &mut EngineContext, dt: f32);
}

/// Published after the current scene changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneChanged {
    pub from: Option<String>,
    pub to: String,
}

/// Scene registry with a back stack.
///
/// [`switch_to`](Self::switch_to) changes the current scene without
/// touching the history; [`navigate_to`](Self::navigate_to) and
/// [`navigate_back`](Self::navigate_back) push and pop it.
#[derive(Default)]
pub struct SceneManager {
    scenes: HashMap<String, Box<dyn Scene>>,
    current: Option<String>,
    history: Vec<String>,
}

impl SceneManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, scene: Box<dyn Scene>) -> Result<()> {
        let name = name.into();
        if self.scenes.contains_key(&name) {
            return Err(Error::DuplicateScene(name));
        }
        tracing::debug!("Registered scene {name}");
        self.scenes.insert(name, scene);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    /// Name of the current scene.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Navigation history, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn can_navigate_back(&self) -> bool {
        self.history.len() > 1
    }

    /// Make `name` current, running the exit and enter hooks.
    ///
    /// If the new scene fails to enter, the previous one is entered again.
    pub fn switch_to(&mut self, name: &str, ctx: &mut EngineContext) -> Result<()> {
        if !self.scenes.contains_key(name) {
            tracing::error!("Unknown scene {name}");
            return Err(Error::NotFound(format!("scene {name}")));
        }
        if self.current.as_deref() == Some(name) {
            return Ok(());
        }

        let previous = self.current.take();
        if let Some(scene) = previous.as_ref().and_then(|p| self.scenes.get_mut(p)) {
            scene.exit(ctx);
        }

        let entered = self
            .scenes
            .get_mut(name)
            .map_or(Ok(()), |scene| scene.enter(ctx));
        if let Err(e) = entered {
            tracing::error!("Scene {name} failed to enter: {e}");
            if let Some(scene) = previous.as_ref().and_then(|p| self.scenes.get_mut(p)) {
                if let Err(e) = scene.enter(ctx) {
                    tracing::error!("Failed to restore previous scene: {e}");
                } else {
                    self.current = previous;
                }
            }
            return Err(e);
        }

        tracing::info!("Scene {} -> {name}", previous.as_deref().unwrap_or("<none>"));
        ctx.events.publish(SceneChanged {
            from: previous,
            to: name.to_string(),
        });
        self.current = Some(name.to_string());
        Ok(())
    }

    /// Switch to `name` and push it on the history.
    pub fn navigate_to(&mut self, name: &str, ctx: &mut EngineContext) -> Result<()> {
        if self.current.as_deref() == Some(name) {
            return Ok(());
        }
        self.switch_to(name, ctx)?;
        self.history.push(name.to_string());
        Ok(())
    }

    /// Return to the previous scene in the history. Returns `false` when
    /// there is nothing to go back to.
    pub fn navigate_back(&mut self, ctx: &mut EngineContext) -> Result<bool> {
        if !self.can_navigate_back() {
            return Ok(false);
        }
        let Some(target) = self.history.get(self.history.len() - 2).cloned() else {
            return Ok(false);
        };
        self.switch_to(&target, ctx)?;
        self.history.pop();
        Ok(true)
    }

    /// Update the current scene.
    pub fn update(&mut self, ctx: &mut EngineContext, dt: f32) {
        if let Some(scene) = self.current.as_ref().and_then(|c| self.scenes.get_mut(c)) {
            scene.update(ctx, dt);
        }
    }

    /// Exit the current scene and clear the history.
    pub fn clear(&mut self, ctx: &mut EngineContext) {
        if let Some(scene) = self.current.take().and_then(|c| self.scenes.get_mut(&c)) {
            scene.exit(ctx);
        }
        self.history.clear();
    }
}

impl std::fmt::Debug for SceneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneManager")
            .field("scenes", &self.scenes.len())
            .field("current", &self.current)
            .field("history", &self.history)
            .finish()
    }
}
