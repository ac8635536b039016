//! BPM/key sources that do not involve signal analysis
//!
//! - **text_patterns** - pure free-text extractors (platform tags, description, title, comments)
//! - **embedded_tags** - tag fields already present in the downloaded file

pub mod embedded_tags;
pub mod text_patterns;

pub use embedded_tags::LoftyTagReader;
pub use text_patterns::{extract_bare_key, extract_bpm, extract_key};
