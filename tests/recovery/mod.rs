mod sled_restart;
