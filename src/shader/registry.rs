//! Shader registry: identity → per-backend entry points.
//!
//! Populated once at startup, read-only afterwards. Registration goes
//! through a [`ShaderRegistrar`] builder that commits on [`finish`].
//!
//! [`finish`]: ShaderRegistrar::finish

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::{cpu_entry, gpu_entry, Backend, EntryPoint, GpuShader, Shader};
use crate::util::{Error, Result};

/// Stable key of one shader implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(String);

impl ShaderId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ShaderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ShaderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registered shader: display name and attached backends.
#[derive(Clone)]
pub struct ShaderMeta {
    pub name: String,
    pub entries: BTreeMap<Backend, EntryPoint>,
}

impl fmt::Debug for ShaderMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderMeta")
            .field("name", &self.name)
            .field("backends", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ShaderMeta {
    /// Backends this shader can run on.
    pub fn backends(&self) -> impl Iterator<Item = Backend> + '_ {
        self.entries.keys().copied()
    }
}

/// Process-wide shader table.
#[derive(Debug, Default)]
pub struct ShaderRegistry {
    shaders: HashMap<ShaderId, ShaderMeta>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in shader.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry)?;
        Ok(registry)
    }

    /// Begin registering `id`. Nothing is stored until [`ShaderRegistrar::finish`].
    pub fn register(
        &mut self,
        id: impl Into<ShaderId>,
        name: impl Into<String>,
    ) -> ShaderRegistrar<'_> {
        ShaderRegistrar {
            registry: self,
            id: id.into(),
            meta: ShaderMeta {
                name: name.into(),
                entries: BTreeMap::new(),
            },
        }
    }

    /// Entry point of `id` for `backend`.
    pub fn resolve(&self, id: &ShaderId, backend: Backend) -> Result<EntryPoint> {
        let meta = self
            .shaders
            .get(id)
            .ok_or_else(|| Error::ShaderNotFound(id.to_string()))?;
        meta.entries
            .get(&backend)
            .copied()
            .ok_or_else(|| Error::BackendUnavailable {
                shader: id.to_string(),
                backend,
            })
    }

    pub fn get(&self, id: &ShaderId) -> Option<&ShaderMeta> {
        self.shaders.get(id)
    }

    pub fn contains(&self, id: &ShaderId) -> bool {
        self.shaders.contains_key(id)
    }

    /// All registered shaders, sorted by identity.
    pub fn list(&self) -> Vec<(&ShaderId, &ShaderMeta)> {
        let mut out: Vec<_> = self.shaders.iter().collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

/// Pending registration.
#[must_use = "a registration is only stored by finish()"]
pub struct ShaderRegistrar<'r> {
    registry: &'r mut ShaderRegistry,
    id: ShaderId,
    meta: ShaderMeta,
}

impl ShaderRegistrar<'_> {
    /// Attach a CPU entry point.
    pub fn with_cpu(mut self, entry: EntryPoint) -> Self {
        self.meta.entries.insert(Backend::Cpu, entry);
        self
    }

    /// Attach a GPU entry point.
    pub fn with_gpu(mut self, entry: EntryPoint) -> Self {
        self.meta.entries.insert(Backend::Gpu, entry);
        self
    }

    /// Attach the CPU entry point generated for `S`.
    pub fn cpu<S: Shader>(self) -> Self {
        self.with_cpu(cpu_entry::<S>())
    }

    /// Attach the GPU entry point generated for `S`.
    pub fn gpu<S: GpuShader>(self) -> Self {
        self.with_gpu(gpu_entry::<S>())
    }

    /// Commit. Fails when the identity is already registered.
    pub fn finish(self) -> Result<()> {
        if self.registry.shaders.contains_key(&self.id) {
            return Err(Error::DuplicateShader(self.id.to_string()));
        }
        tracing::debug!(
            shader = %self.id,
            backends = ?self.meta.entries.keys().collect::<Vec<_>>(),
            "registered shader"
        );
        self.registry.shaders.insert(self.id, self.meta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{PassDesc, ShadingStatus};

    fn noop(_: &mut PassDesc<'_>, _: &[u8]) -> ShadingStatus {
        ShadingStatus::Ok
    }

    #[test]
    fn test_register_and_resolve() {
        let mut reg = ShaderRegistry::new();
        reg.register("noop", "No-op").with_cpu(noop).finish().unwrap();

        let id = ShaderId::from("noop");
        assert!(reg.resolve(&id, Backend::Cpu).is_ok());
        assert_eq!(reg.get(&id).unwrap().name, "No-op");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_unfinished_registration_is_dropped() {
        let mut reg = ShaderRegistry::new();
        let _ = reg.register("noop", "No-op").with_cpu(noop);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_list_sorted() {
        let mut reg = ShaderRegistry::new();
        reg.register("b", "B").with_cpu(noop).finish().unwrap();
        reg.register("a", "A").with_gpu(noop).finish().unwrap();
        let ids: Vec<_> = reg.list().into_iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
