// crates/core/src/display.rs
//! Terminal formatting strategy, passed explicitly to whatever renders.

use console::style;

use crate::job::Phase;

/// Semantic color roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Heading,
    Success,
    Failure,
    Active,
    Waiting,
    Muted,
}

/// Colored or plain output. Carries no global state; two palettes with
/// different settings can coexist in one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    color: bool,
}

impl Palette {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    pub fn colored() -> Self {
        Self::new(true)
    }

    /// Colored when stdout is a terminal.
    pub fn detect() -> Self {
        Self::new(console::Term::stdout().is_term())
    }

    pub fn is_colored(&self) -> bool {
        self.color
    }

    pub fn paint(&self, text: impl std::fmt::Display, tone: Tone) -> String {
        if !self.color {
            return text.to_string();
        }
        let styled = style(text.to_string()).force_styling(true);
        let styled = match tone {
            Tone::Heading => styled.cyan().bold(),
            Tone::Success => styled.green().bold(),
            Tone::Failure => styled.red().bold(),
            Tone::Active => styled.yellow(),
            Tone::Waiting => styled.blue(),
            Tone::Muted => styled.dim(),
        };
        styled.to_string()
    }

    /// Tone for a schedule or execution phase. `failed` only counts once dead.
    pub fn phase_tone(phase: &Phase, failed: Option<bool>) -> Tone {
        match (phase, failed) {
            (Phase::Dead, Some(true)) => Tone::Failure,
            (Phase::Dead, _) => Tone::Success,
            (Phase::Running, _) => Tone::Active,
            (Phase::Pending, _) => Tone::Waiting,
            (Phase::Unrecognized(_), _) => Tone::Muted,
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::plain()
    }
}
