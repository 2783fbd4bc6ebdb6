//! Origin groups.
//!
//! # Responsibilities
//! - Group backends by name
//! - Apply the configured selection strategy
//! - Hand out connection guards

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::origin::backend::{Backend, BackendGuard};
use crate::origin::balancer::{self, LoadBalancer};
use crate::origin::OriginError;

#[derive(Debug)]
struct Group {
    backends: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
}

#[derive(Debug)]
pub struct OriginPool {
    groups: HashMap<String, Group>,
}

impl OriginPool {
    pub fn new(configs: &[BackendConfig], strategy: &str) -> Self {
        let mut members: HashMap<String, Vec<Arc<Backend>>> = HashMap::new();
        for config in configs {
            match config.address.parse() {
                Ok(addr) => members.entry(config.group.clone()).or_default().push(Arc::new(
                    Backend::new(&config.name, addr, config.max_connections),
                )),
                Err(_) => tracing::warn!(backend = %config.name, address = %config.address, "invalid backend address"),
            }
        }
        let groups = members
            .into_iter()
            .map(|(name, backends)| {
                let group = Group {
                    backends,
                    balancer: balancer::by_name(strategy),
                };
                (name, group)
            })
            .collect();
        Self { groups }
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Select a backend of `group` and reserve a connection slot on it.
    pub fn acquire(&self, group: &str) -> Result<BackendGuard, OriginError> {
        let entry = self
            .groups
            .get(group)
            .ok_or_else(|| OriginError::UnknownGroup(group.to_string()))?;
        let backend = entry.balancer.next_server(&entry.backends).ok_or_else(|| {
            tracing::debug!(group, backends = entry.backends.len(), "no healthy backend in group");
            OriginError::NoHealthyBackend(group.to_string())
        })?;
        backend
            .try_acquire()
            .ok_or_else(|| OriginError::AtCapacity(backend.name.clone()))
    }

    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.groups
            .values()
            .flat_map(|g| g.backends.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, group: &str, address: &str, max: usize) -> BackendConfig {
        BackendConfig {
            name: name.into(),
            group: group.into(),
            address: address.into(),
            max_connections: max,
        }
    }

    #[test]
    fn test_groups_and_capacity() {
        let pool = OriginPool::new(
            &[
                config("web-1", "default", "127.0.0.1:3000", 1),
                config("api-1", "api", "127.0.0.1:4000", 5),
                config("bad", "api", "not-an-addr", 5),
            ],
            "round_robin",
        );
        assert!(pool.contains("default"));
        assert_eq!(pool.all_backends().len(), 2);

        let guard = pool.acquire("default").unwrap();
        assert_eq!(guard.name, "web-1");
        assert!(matches!(pool.acquire("default"), Err(OriginError::AtCapacity(_))));
        drop(guard);
        assert!(pool.acquire("default").is_ok());

        assert!(matches!(pool.acquire("missing"), Err(OriginError::UnknownGroup(_))));
    }

    #[test]
    fn test_unhealthy_group() {
        let pool = OriginPool::new(&[config("web-1", "default", "127.0.0.1:3000", 1)], "least_connections");
        pool.all_backends()[0].mark_failure(1);
        assert!(matches!(
            pool.acquire("default"),
            Err(OriginError::NoHealthyBackend(_))
        ));
    }
}
