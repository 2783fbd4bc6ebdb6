//! Backend selection strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::origin::backend::Backend;

pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick a healthy backend, or `None` when every backend is unhealthy.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Strategy by config name. Unknown names fall back to round-robin.
pub fn by_name(name: &str) -> Box<dyn LoadBalancer> {
    match name {
        "least_connections" | "least_conn" => Box::new(LeastConnections),
        "round_robin" => Box::new(RoundRobin::default()),
        other => {
            tracing::warn!(strategy = other, "unknown balancing strategy, using round_robin");
            Box::new(RoundRobin::default())
        }
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = backends.len();
        (0..len)
            .map(|i| &backends[(start + i) % len])
            .find(|b| b.is_healthy())
            .cloned()
    }
}

/// Fewest in-flight requests wins; ties go to the first backend.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LoadBalancer for LeastConnections {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        backends
            .iter()
            .filter(|b| b.is_healthy())
            .min_by_key(|b| b.active_connections())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Arc<Backend>, Arc<Backend>) {
        (
            Arc::new(Backend::new("a", "127.0.0.1:3000".parse().unwrap(), 100)),
            Arc::new(Backend::new("b", "127.0.0.1:3001".parse().unwrap(), 100)),
        )
    }

    #[test]
    fn test_round_robin_rotates_and_skips_unhealthy() {
        let lb = RoundRobin::default();
        let (a, b) = pair();
        let backends = vec![a.clone(), b.clone()];
        assert_eq!(lb.next_server(&backends).unwrap().name, "a");
        assert_eq!(lb.next_server(&backends).unwrap().name, "b");
        assert_eq!(lb.next_server(&backends).unwrap().name, "a");

        b.mark_failure(1);
        for _ in 0..3 {
            assert_eq!(lb.next_server(&backends).unwrap().name, "a");
        }
        a.mark_failure(1);
        assert!(lb.next_server(&backends).is_none());
    }

    #[test]
    fn test_least_connections() {
        let lb = LeastConnections;
        let (a, b) = pair();
        let backends = vec![a.clone(), b.clone()];
        let _held = a.try_acquire().unwrap();
        assert_eq!(lb.next_server(&backends).unwrap().name, "b");

        let _b1 = b.try_acquire().unwrap();
        let _b2 = b.try_acquire().unwrap();
        assert_eq!(lb.next_server(&backends).unwrap().name, "a");

        a.mark_failure(1);
        assert_eq!(lb.next_server(&backends).unwrap().name, "b");
    }

    #[test]
    fn test_strategy_by_name() {
        let (a, _) = pair();
        for name in ["round_robin", "least_connections", "bogus"] {
            assert!(by_name(name).next_server(&[a.clone()]).is_some());
        }
    }
}
