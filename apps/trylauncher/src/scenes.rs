//! Launcher scenes and engine modules.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use trylauncher_core::{
    EngineContext, EngineModule, InputEvent, Result, Scene, SettingPath, SettingsChanged,
};

pub const HOME: &str = "home";
pub const SETTINGS: &str = "settings";

/// Requests made by input handlers, applied by the launcher each update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Open(&'static str),
    Back,
    ToggleVsync,
}

pub type Requests = Arc<Mutex<Vec<Request>>>;

/// A screen that only tracks how long it has been shown.
pub struct Screen {
    name: &'static str,
    shown_for: f32,
}

impl Screen {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            shown_for: 0.0,
        }
    }
}

impl Scene for Screen {
    fn enter(&mut self, _ctx: &mut EngineContext) -> Result<()> {
        self.shown_for = 0.0;
        info!("Entered {}", self.name);
        Ok(())
    }

    fn exit(&mut self, _ctx: &mut EngineContext) {
        debug!("Left {} after {:.1}s", self.name, self.shown_for);
    }

    fn update(&mut self, _ctx: &mut EngineContext, dt: f32) {
        self.shown_for += dt;
    }
}

/// Logs every settings change.
pub struct SettingsModule;

impl EngineModule for SettingsModule {
    fn name(&self) -> &'static str {
        "settings"
    }

    fn initialize(&mut self, ctx: &mut EngineContext) -> Result<()> {
        ctx.events.subscribe(|change: &SettingsChanged| {
            info!("Setting {} changed: {} -> {}", change.path, change.old, change.new);
        });
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &mut EngineContext) {}
}

/// Maps key presses to launcher requests.
pub struct InputModule {
    requests: Requests,
}

impl InputModule {
    pub const fn new(requests: Requests) -> Self {
        Self { requests }
    }
}

impl EngineModule for InputModule {
    fn name(&self) -> &'static str {
        "input"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["settings"]
    }

    fn initialize(&mut self, ctx: &mut EngineContext) -> Result<()> {
        let requests = Arc::clone(&self.requests);
        ctx.events.subscribe(move |event: &InputEvent| {
            if let Some(request) = request_for(event) {
                requests.lock().push(request);
            }
        });
        Ok(())
    }

    fn shutdown(&mut self, _ctx: &mut EngineContext) {
        self.requests.lock().clear();
    }
}

fn request_for(event: &InputEvent) -> Option<Request> {
    match event {
        InputEvent::Key {
            key,
            pressed: true,
            repeat: false,
        } => match key.as_str() {
            "Tab" => Some(Request::Open(SETTINGS)),
            "Escape" => Some(Request::Back),
            "KeyV" => Some(Request::ToggleVsync),
            _ => None,
        },
        _ => None,
    }
}

/// Apply queued requests to the scene stack and settings.
pub fn apply_requests(
    requests: &Requests,
    scenes: &mut trylauncher_core::SceneManager,
    ctx: &mut EngineContext,
) -> Result<()> {
    let pending: Vec<Request> = requests.lock().drain(..).collect();
    for request in pending {
        match request {
            Request::Open(name) => scenes.navigate_to(name, ctx)?,
            Request::Back => {
                scenes.navigate_back(ctx)?;
            }
            Request::ToggleVsync => {
                let vsync = ctx
                    .settings
                    .get(SettingPath::Vsync)
                    .as_bool()
                    .unwrap_or(true);
                ctx.settings.set(SettingPath::Vsync, !vsync)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trylauncher_core::{ModuleGraph, SceneManager};

    fn key(name: &str) -> InputEvent {
        InputEvent::Key {
            key: name.to_string(),
            pressed: true,
            repeat: false,
        }
    }

    #[test]
    fn input_module_follows_settings_module() {
        let requests = Requests::default();
        let mut graph = ModuleGraph::new();
        graph
            .register(Box::new(InputModule::new(Arc::clone(&requests))))
            .unwrap();
        graph.register(Box::new(SettingsModule)).unwrap();

        let mut ctx = EngineContext::new("unused.json");
        graph.initialize(&mut ctx).unwrap();
        assert_eq!(graph.order(), vec!["settings", "input"]);
        graph.shutdown(&mut ctx);
    }

    #[test]
    fn keys_drive_navigation_and_settings() {
        let requests = Requests::default();
        let mut graph = ModuleGraph::new();
        graph.register(Box::new(SettingsModule)).unwrap();
        graph
            .register(Box::new(InputModule::new(Arc::clone(&requests))))
            .unwrap();

        let mut ctx = EngineContext::new("unused.json");
        graph.initialize(&mut ctx).unwrap();

        let mut scenes = SceneManager::new();
        scenes.register(HOME, Box::new(Screen::new(HOME))).unwrap();
        scenes
            .register(SETTINGS, Box::new(Screen::new(SETTINGS)))
            .unwrap();
        scenes.navigate_to(HOME, &mut ctx).unwrap();

        ctx.events.publish(key("Tab"));
        ctx.events.publish(key("Tab"));
        ctx.events.publish(key("KeyV"));
        ctx.events.process();
        apply_requests(&requests, &mut scenes, &mut ctx).unwrap();

        assert_eq!(scenes.current(), Some(SETTINGS));
        assert_eq!(scenes.history().len(), 2);
        assert_eq!(ctx.settings.get(SettingPath::Vsync).as_bool(), Some(false));

        ctx.events.publish(key("Escape"));
        ctx.events.publish(InputEvent::Key {
            key: "Escape".to_string(),
            pressed: false,
            repeat: false,
        });
        ctx.events.process();
        apply_requests(&requests, &mut scenes, &mut ctx).unwrap();
        assert_eq!(scenes.current(), Some(HOME));
        assert!(!scenes.can_navigate_back());

        graph.shutdown(&mut ctx);
    }
}
