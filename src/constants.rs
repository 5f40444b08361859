// -
// Database namespaces

/// Sled tree holding the live objects, keyed by object key
pub(crate) const OBJECTS_TREE: &str = "_objects_tree";
/// Sled tree holding store metadata
pub(crate) const META_TREE: &str = "_store_metadata";

/// Sled entry key namespaces
pub(crate) const META_KEY_LAST_RESOURCE_VERSION: &str = "_last_resource_version";

/// Sub directory of `db_root_dir` holding the sled database
pub(crate) const STORE_DB_DIR: &str = "store";
