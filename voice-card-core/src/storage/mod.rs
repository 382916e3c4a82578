pub mod audio_writer;
pub mod metadata;
