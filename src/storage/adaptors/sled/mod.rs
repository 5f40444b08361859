mod sled_backend;


use std::path::Path;

pub use sled_backend::*;

use crate::constants::STORE_DB_DIR;
use crate::Error;

#[doc(hidden)]
pub fn init_sled_store_db(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug,
    cache_capacity: u64,
) -> Result<sled::Db, Error> {
    tracing::debug!("init_sled_store_db from path: {:?}", &sled_db_root_path);

    let path = sled_db_root_path.as_ref();
    let store_db_path = path.join(STORE_DB_DIR);

    sled::Config::default()
        .path(&store_db_path)
        .cache_capacity(cache_capacity)
        .flush_every_ms(Some(3))
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            tracing::warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                store_db_path,
                e
            );
            e.into()
        })
}
