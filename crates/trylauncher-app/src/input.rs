//! Translation of winit window events into engine input events.

use trylauncher_core::InputEvent;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::PhysicalKey;

/// Tracks the cursor so button and motion events carry positions and deltas.
#[derive(Debug, Default)]
pub struct InputTranslator {
    cursor: Option<(f64, f64)>,
}

impl InputTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known cursor position in physical pixels.
    pub const fn cursor(&self) -> Option<(f64, f64)> {
        self.cursor
    }

    /// Engine events for one window event, in the order they should be published.
    pub fn translate(&mut self, event: &WindowEvent) -> Vec<InputEvent> {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                let key = match event.physical_key {
                    PhysicalKey::Code(code) => format!("{code:?}"),
                    PhysicalKey::Unidentified(native) => format!("{native:?}"),
                };
                let pressed = event.state == ElementState::Pressed;
                let mut events = vec![InputEvent::Key {
                    key,
                    pressed,
                    repeat: event.repeat,
                }];
                if pressed {
                    if let Some(text) = &event.text {
                        events.extend(text.chars().filter(|c| !c.is_control()).map(InputEvent::Char));
                    }
                }
                events
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let (x, y) = self.cursor.unwrap_or_default();
                vec![InputEvent::MouseButton {
                    button: button_index(*button),
                    pressed: *state == ElementState::Pressed,
                    x,
                    y,
                }]
            }
            WindowEvent::CursorMoved { position, .. } => {
                let (delta_x, delta_y) = self
                    .cursor
                    .map_or((0.0, 0.0), |(x, y)| (position.x - x, position.y - y));
                self.cursor = Some((position.x, position.y));
                vec![InputEvent::MouseMove {
                    x: position.x,
                    y: position.y,
                    delta_x,
                    delta_y,
                }]
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                Vec::new()
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (delta_x, delta_y) = match delta {
                    MouseScrollDelta::LineDelta(x, y) => (f64::from(*x), f64::from(*y)),
                    MouseScrollDelta::PixelDelta(position) => (position.x, position.y),
                };
                vec![InputEvent::MouseScroll { delta_x, delta_y }]
            }
            WindowEvent::Resized(size) => vec![InputEvent::WindowResized {
                width: size.width,
                height: size.height,
            }],
            WindowEvent::CloseRequested => vec![InputEvent::WindowClose],
            _ => Vec::new(),
        }
    }
}

const fn button_index(button: MouseButton) -> u16 {
    match button {
        MouseButton::Left => 0,
        MouseButton::Right => 1,
        MouseButton::Middle => 2,
        MouseButton::Back => 3,
        MouseButton::Forward => 4,
        MouseButton::Other(index) => index,
    }
}
