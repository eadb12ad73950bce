mod command_overlay;
mod conflict_overlay;
mod input;

pub use command_overlay::{draw_command_overlay, draw_prompt};
pub use conflict_overlay::draw_conflict_overlay;
pub use input::{InputResult, TextInput};
