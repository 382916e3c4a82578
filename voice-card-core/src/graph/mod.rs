pub mod audio_graph;
pub mod clock;
pub mod destination;
