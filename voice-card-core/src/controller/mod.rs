pub mod recording_controller;
