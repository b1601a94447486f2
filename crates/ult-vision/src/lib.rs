mod characters;
mod markers;
mod perception;
mod templates;

pub use characters::{CharacterReferences, PickCheck, PICK_TOLERANCE};
pub use markers::{pick_strip, Marker};
pub use perception::{diff_percent, Matcher, Perception, DEFAULT_TOLERANCE};
pub use templates::{Profile, Template, TemplateStore};
