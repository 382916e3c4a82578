pub mod analyser;
pub mod gain;
pub mod mixer;
pub mod ring_buffer;
pub mod wav_format;
