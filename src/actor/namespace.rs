//! Keyed registry guaranteeing one live instance per actor id.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use super::{ActorError, Clock, SqlStorage};

/// What a factory receives to build one actor instance.
pub struct ActorContext {
    pub id: String,
    pub storage: Arc<SqlStorage>,
    pub clock: Arc<dyn Clock>,
}

type Factory<A> = Box<dyn Fn(ActorContext) -> Result<Arc<A>, ActorError> + Send + Sync>;

pub struct Namespace<A> {
    name: String,
    state_dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    instances: DashMap<String, Arc<A>>,
    factory: Factory<A>,
}

impl<A> Namespace<A> {
    pub fn new(
        name: impl Into<String>,
        state_dir: Option<PathBuf>,
        clock: Arc<dyn Clock>,
        factory: impl Fn(ActorContext) -> Result<Arc<A>, ActorError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            state_dir,
            clock,
            instances: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance for `id`, created (and its state restored) on first use.
    pub fn get(&self, id: &str) -> Result<Arc<A>, ActorError> {
        if let Some(actor) = self.instances.get(id) {
            return Ok(Arc::clone(actor.value()));
        }
        let entry = self
            .instances
            .entry(id.to_string())
            .or_try_insert_with(|| {
                let storage = match &self.state_dir {
                    Some(dir) => SqlStorage::open(&dir.join(&self.name).join(file_name(id)))?,
                    None => SqlStorage::in_memory()?,
                };
                tracing::debug!(namespace = %self.name, id, "actor instance created");
                (self.factory)(ActorContext {
                    id: id.to_string(),
                    storage: Arc::new(storage),
                    clock: Arc::clone(&self.clock),
                })
            })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Ids of the instances created so far, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn instances(&self) -> Vec<(String, Arc<A>)> {
        let mut all: Vec<(String, Arc<A>)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

impl<A> std::fmt::Debug for Namespace<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("state_dir", &self.state_dir)
            .field("instances", &self.instances.len())
            .finish()
    }
}

fn file_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.sqlite")
}
