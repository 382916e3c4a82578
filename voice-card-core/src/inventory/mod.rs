pub mod device_inventory;
