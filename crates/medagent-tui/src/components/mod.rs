use ratatui::layout::Rect;

pub mod error;
pub mod input;
pub mod knowledge;
pub mod patients;

pub use error::ErrorPopup;
pub use input::Prompt;
pub use knowledge::KnowledgePane;
pub use patients::PatientsPane;

/// Rect of the given size centered in `area`, clamped to fit.
pub(crate) fn popup_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
