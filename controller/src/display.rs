use std::path::PathBuf;

use tracing::{debug, info, warn};

use thermostat_common::UnitCommand;

/// Backlight colour for the character display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Cooling,
    Heating,
}

impl Tone {
    pub fn for_command(command: UnitCommand) -> Self {
        match command {
            UnitCommand::Off => Self::Neutral,
            UnitCommand::Cool => Self::Cooling,
            UnitCommand::Heat => Self::Heating,
        }
    }

    pub fn rgb(self) -> (f32, f32, f32) {
        match self {
            Self::Neutral => (0.0, 1.0, 0.0),
            Self::Cooling => (0.0, 0.0, 1.0),
            Self::Heating => (1.0, 0.0, 0.0),
        }
    }
}

/// Write-only status output. Nothing here feeds back into control.
pub trait DisplayPort: Send {
    fn show_message(&mut self, text: &str, tone: Tone);
    fn show_temperature(&mut self, temp_f: f32);
}

impl<T: DisplayPort + ?Sized> DisplayPort for Box<T> {
    fn show_message(&mut self, text: &str, tone: Tone) {
        (**self).show_message(text, tone);
    }

    fn show_temperature(&mut self, temp_f: f32) {
        (**self).show_temperature(temp_f);
    }
}

pub fn format_temperature(temp_f: f32) -> String {
    format!("{temp_f:.2}°F")
}

#[derive(Debug, Default)]
pub struct LogDisplay;

impl DisplayPort for LogDisplay {
    fn show_message(&mut self, text: &str, tone: Tone) {
        info!(target: "display", ?tone, "{text}");
    }

    fn show_temperature(&mut self, temp_f: f32) {
        debug!(target: "display", "{}", format_temperature(temp_f));
    }
}

/// Clear-and-rewrite of a small text frame, for an external LCD driver to
/// pick up. First line is the backlight colour as `r,g,b`.
#[derive(Debug)]
pub struct FileDisplay {
    path: PathBuf,
    tone: Tone,
}

impl FileDisplay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tone: Tone::Neutral,
        }
    }

    fn render(&self, text: &str) {
        let (r, g, b) = self.tone.rgb();
        let frame = format!("{r:.1},{g:.1},{b:.1}\n{text}\n");
        if let Err(err) = std::fs::write(&self.path, frame) {
            warn!("display write to {} failed: {err}", self.path.display());
        }
    }
}

impl DisplayPort for FileDisplay {
    fn show_message(&mut self, text: &str, tone: Tone) {
        self.tone = tone;
        self.render(text);
    }

    fn show_temperature(&mut self, temp_f: f32) {
        self.render(&format_temperature(temp_f));
    }
}
