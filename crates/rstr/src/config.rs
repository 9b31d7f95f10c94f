//! Bridge from file/env configuration to the store's own settings.

use std::time::Duration;

use cas::CasConfig;
use rstrconf::StoreConfig;

/// Translate the `[store]` section into a [`CasConfig`].
pub fn cas_config(store: &StoreConfig) -> CasConfig {
    CasConfig {
        base_path: store.data_path.clone(),
        staging_dir: store.tmp_directory.clone(),
        shard_depth: store.shard_depth,
        store_metadata: store.store_metadata,
        fsync: store.fsync,
        read_only: store.read_only,
        staging_max_age: Duration::from_secs(store.staging_max_age_secs),
    }
}
