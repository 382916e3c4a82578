pub mod volume_meter;
