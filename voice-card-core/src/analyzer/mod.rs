pub mod summary;
pub mod voice_analyzer;
