use crate::types::{Color, Pt};

// Cubic Bezier control distance for a quarter circle of radius 1.
const CIRCLE_KAPPA: f64 = 0.552_284_749_831;

/// Drawing operations in page points, bottom-left origin.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetFont { name: String, size: Pt },
    MoveTo { x: Pt, y: Pt },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    DrawString { x: Pt, y: Pt, text: String },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    font: Option<(String, Pt)>,
}

/// Command recorder for the single target page.
pub struct Canvas {
    commands: Vec<Command>,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            state_stack: Vec::new(),
            current_state: GraphicsState {
                fill_color: Color::BLACK,
                font: None,
            },
        }
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.commands.push(Command::RestoreState);
        }
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub fn set_font(&mut self, name: &str, size: Pt) {
        if let Some((current_name, current_size)) = &self.current_state.font {
            if current_name == name && *current_size == size {
                return;
            }
        }
        self.current_state.font = Some((name.to_string(), size));
        self.commands.push(Command::SetFont {
            name: name.to_string(),
            size,
        });
    }

    pub fn draw_string(&mut self, x: f64, y: f64, text: impl Into<String>) {
        self.commands.push(Command::DrawString {
            x: Pt::from_f64(x),
            y: Pt::from_f64(y),
            text: text.into(),
        });
    }

    pub fn draw_image(&mut self, x: f64, y: f64, width: f64, height: f64, resource_id: &str) {
        self.commands.push(Command::DrawImage {
            x: Pt::from_f64(x),
            y: Pt::from_f64(y),
            width: Pt::from_f64(width),
            height: Pt::from_f64(height),
            resource_id: resource_id.to_string(),
        });
    }

    /// Appends a closed circle path as four Bezier quadrants and fills it.
    pub fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64) {
        let k = radius * CIRCLE_KAPPA;
        let p = Pt::from_f64;
        self.commands.push(Command::MoveTo {
            x: p(cx + radius),
            y: p(cy),
        });
        let quadrants = [
            (cx + radius, cy + k, cx + k, cy + radius, cx, cy + radius),
            (cx - k, cy + radius, cx - radius, cy + k, cx - radius, cy),
            (cx - radius, cy - k, cx - k, cy - radius, cx, cy - radius),
            (cx + k, cy - radius, cx + radius, cy - k, cx + radius, cy),
        ];
        for (x1, y1, x2, y2, x, y) in quadrants {
            self.commands.push(Command::CurveTo {
                x1: p(x1),
                y1: p(y1),
                x2: p(x2),
                y2: p(y2),
                x: p(x),
                y: p(y),
            });
        }
        self.commands.push(Command::ClosePath);
        self.commands.push(Command::Fill);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn finish(mut self) -> Vec<Command> {
        while !self.state_stack.is_empty() {
            self.restore_state();
        }
        self.commands
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}
