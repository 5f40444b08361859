use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::BincodeCodec;
use crate::Codec;
use crate::KeyFunc;
use crate::MemoryBackend;
use crate::Object;
use crate::Store;
use crate::StoreConfig;

/// Minimal namespaced object used across unit tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: u64,
    pub node_name: String,
}

impl Object for Pod {
    fn resource_version(&self) -> u64 {
        self.resource_version
    }

    fn set_resource_version(
        &mut self,
        rv: u64,
    ) {
        self.resource_version = rv;
    }

    fn uid(&self) -> Option<&str> {
        if self.uid.is_empty() {
            None
        } else {
            Some(&self.uid)
        }
    }
}

pub fn pod(
    namespace: &str,
    name: &str,
) -> Pod {
    Pod {
        namespace: namespace.to_string(),
        name: name.to_string(),
        uid: format!("{namespace}-{name}-uid"),
        resource_version: 0,
        node_name: String::new(),
    }
}

pub fn pod_key(
    namespace: &str,
    name: &str,
) -> String {
    format!("/pods/{namespace}/{name}")
}

pub fn pod_key_func() -> KeyFunc<Pod> {
    Arc::new(|p: &Pod| Ok(pod_key(&p.namespace, &p.name)))
}

/// In-memory store with a short progress interval. Must run inside a tokio runtime.
pub fn memory_store() -> Store<Pod> {
    let mut config = StoreConfig::default();
    config.watch.progress_notify_interval_ms = 50;
    memory_store_with(config)
}

pub fn memory_store_with(config: StoreConfig) -> Store<Pod> {
    Store::with_backend(
        config,
        Arc::new(MemoryBackend::new()),
        pod_codec(),
        pod_key_func(),
    )
    .expect("open memory store")
}

pub fn pod_codec() -> Arc<dyn Codec<Pod>> {
    Arc::new(BincodeCodec::<Pod>::new())
}

/// Encoded form as written by the store (resource version cleared)
pub fn encode_pod(p: &Pod) -> Bytes {
    crate::codec::encode_object(pod_codec().as_ref(), p).expect("encode pod")
}
