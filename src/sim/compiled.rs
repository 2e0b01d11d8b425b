use std::{collections::HashMap, sync::Arc};

use crate::{
    error::StudioResult,
    spec::{self, AgentId, EnvSpec, ObjectId, ObjectKind, SpecHash},
};

/// Index-addressed view of a validated, sanitized [`EnvSpec`].
///
/// Agents and objects are referenced by arena index everywhere inside the
/// kernel; the id maps exist only for rule conditions that address entities
/// by name. This is the artifact held by the compiled-environment cache, so
/// it is cheap to clone (`Arc` inside) and carries its own cache key.
#[derive(Debug, Clone)]
pub struct CompiledEnv {
    spec: Arc<EnvSpec>,
    hash: SpecHash,

    /// Indices of `wall` and `obstacle` objects, in declaration order.
    blocking: Vec<usize>,
    goals: Vec<usize>,
    traps: Vec<usize>,
    keys: Vec<usize>,

    agent_index: HashMap<AgentId, usize>,
    object_index: HashMap<ObjectId, usize>,
}

impl CompiledEnv {
    /// Validates, sanitizes, and indexes a raw spec.
    ///
    /// Validation runs against the caller's spec so error field paths refer
    /// to what was actually submitted; the sanitized copy is what the kernel
    /// executes.
    pub fn compile(raw: &EnvSpec) -> StudioResult<Self> {
        spec::validate::validate(raw)?;
        let sanitized = spec::validate::sanitize(raw);
        let hash = sanitized.hash()?;
        Ok(Self::from_sanitized(sanitized, hash))
    }

    /// Indexes a spec that has already been validated and sanitized.
    pub(crate) fn from_sanitized(spec: EnvSpec, hash: SpecHash) -> Self {
        let mut blocking = Vec::new();
        let mut goals = Vec::new();
        let mut traps = Vec::new();
        let mut keys = Vec::new();
        let mut object_index = HashMap::with_capacity(spec.objects.len());

        for (i, object) in spec.objects.iter().enumerate() {
            match object.kind {
                ObjectKind::Wall | ObjectKind::Obstacle => blocking.push(i),
                ObjectKind::Goal => goals.push(i),
                ObjectKind::Trap => traps.push(i),
                ObjectKind::Key => keys.push(i),
                ObjectKind::Door | ObjectKind::Custom => {}
            }
            object_index.insert(object.id.clone(), i);
        }

        let agent_index = spec
            .agents
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.clone(), i))
            .collect();

        Self {
            spec: Arc::new(spec),
            hash,
            blocking,
            goals,
            traps,
            keys,
            agent_index,
            object_index,
        }
    }

    pub fn spec(&self) -> &EnvSpec {
        &self.spec
    }

    pub fn hash(&self) -> &SpecHash {
        &self.hash
    }

    pub fn blocking(&self) -> &[usize] {
        &self.blocking
    }

    pub fn goals(&self) -> &[usize] {
        &self.goals
    }

    pub fn traps(&self) -> &[usize] {
        &self.traps
    }

    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    pub fn agent_index(&self, id: &AgentId) -> Option<usize> {
        self.agent_index.get(id).copied()
    }

    pub fn object_index(&self, id: &ObjectId) -> Option<usize> {
        self.object_index.get(id).copied()
    }

    /// Spec positions of the indexed objects of one kind.
    pub(crate) fn object_positions<'a>(
        &'a self,
        indices: &'a [usize],
    ) -> impl Iterator<Item = crate::sim::Vec2> + 'a {
        indices.iter().map(|&i| self.spec.objects[i].position)
    }
}
