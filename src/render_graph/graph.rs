//! Render graph definition and compilation

use crate::backend::traits::GraphicsBackend;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Render graph errors
#[derive(Error, Debug)]
pub enum RenderGraphError {
    #[error("Pass '{pass}' uses unknown resource {resource:?}")]
    UnknownResource { pass: String, resource: ResourceId },
    #[error("Pass '{pass}' reads and writes '{resource}' at the same time")]
    ReadWriteHazard { pass: String, resource: String },
    #[error("Resource '{0}' imported twice")]
    DuplicateResource(String),
    #[error("Render graph contains a cycle")]
    Cycle,
    #[error("Render graph must be compiled before execution")]
    NotCompiled,
    #[error("Pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: crate::backend::BackendError,
    },
}

/// The main render graph structure
pub struct RenderGraph<B: GraphicsBackend> {
    passes: Vec<Box<dyn RenderPass<B>>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<GraphResource>,
    next_pass_id: u32,
    next_resource_id: u32,
}

impl<B: GraphicsBackend> RenderGraph<B> {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
        }
    }

    fn import(&mut self, name: &str, kind: ResourceKind) -> Result<ResourceId, RenderGraphError> {
        if self.resources.iter().any(|r| r.name == name) {
            return Err(RenderGraphError::DuplicateResource(name.to_string()));
        }
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(GraphResource {
            id,
            name: name.to_string(),
            kind,
        });
        Ok(id)
    }

    /// Register a caller-owned texture
    pub fn import_texture(&mut self, name: &str) -> Result<ResourceId, RenderGraphError> {
        self.import(name, ResourceKind::Texture)
    }

    /// Register the swapchain image
    pub fn import_swapchain(&mut self, name: &str) -> Result<ResourceId, RenderGraphError> {
        self.import(name, ResourceKind::Swapchain)
    }

    /// Get a resource by name
    pub fn resource(&self, name: &str) -> Option<ResourceId> {
        self.resources.iter().find(|r| r.name == name).map(|r| r.id)
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass<B> + 'static>(&mut self, pass: P) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let mut boxed_pass = Box::new(pass);

        let mut reads = Vec::new();
        let mut writes = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &self.resources,
                reads: &mut reads,
                writes: &mut writes,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            reads,
            writes,
        });

        id
    }

    fn validate(&self) -> Result<(), RenderGraphError> {
        let known: HashSet<ResourceId> = self.resources.iter().map(|r| r.id).collect();
        for node in &self.pass_nodes {
            for usage in node.uses() {
                if !known.contains(&usage.resource) {
                    return Err(RenderGraphError::UnknownResource {
                        pass: node.name.clone(),
                        resource: usage.resource,
                    });
                }
            }
            for read in &node.reads {
                if node.writes_resource(read.resource) {
                    let resource = self
                        .resources
                        .iter()
                        .find(|r| r.id == read.resource)
                        .map(|r| r.name.clone())
                        .unwrap_or_default();
                    return Err(RenderGraphError::ReadWriteHazard {
                        pass: node.name.clone(),
                        resource,
                    });
                }
            }
        }
        Ok(())
    }

    /// Compile the graph - ordering, lifetimes and barrier placement
    pub fn compile(&self) -> Result<CompiledGraph, RenderGraphError> {
        self.validate()?;

        let count = self.pass_nodes.len();

        // Edges follow insertion order: a later pass depends on an earlier one
        // whenever either of them writes a resource both touch.
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];
        for (later_index, later) in self.pass_nodes.iter().enumerate() {
            for (earlier_index, earlier) in self.pass_nodes[..later_index].iter().enumerate() {
                let conflicts = later.reads.iter().any(|r| earlier.writes_resource(r.resource))
                    || later.writes.iter().any(|w| {
                        earlier.writes_resource(w.resource) || earlier.reads_resource(w.resource)
                    });
                if conflicts {
                    dependents[earlier_index].push(later_index);
                    in_degree[later_index] += 1;
                }
            }
        }

        // Kahn's algorithm, lowest insertion index first for a stable order
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(count);
        while let Some(index) = ready.pop_first() {
            sorted.push(index);
            for &next in &dependents[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }
        if sorted.len() != count {
            return Err(RenderGraphError::Cycle);
        }

        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();
        let mut last_use: HashMap<ResourceId, (PassId, ResourceAccess)> = HashMap::new();
        let mut barriers = Vec::new();

        for (order, &index) in sorted.iter().enumerate() {
            let node = &self.pass_nodes[index];
            for usage in node.uses() {
                resource_lifetimes
                    .entry(usage.resource)
                    .and_modify(|l| l.last_use = order)
                    .or_insert(ResourceLifetime {
                        first_use: order,
                        last_use: order,
                    });

                if let Some(&(previous_pass, previous_access)) = last_use.get(&usage.resource) {
                    let needs_barrier = previous_pass != node.id
                        && (previous_access != usage.access || previous_access.is_write());
                    if needs_barrier {
                        barriers.push(Barrier {
                            resource: usage.resource,
                            after_pass: previous_pass,
                            before_pass: node.id,
                            from: previous_access,
                            to: usage.access,
                        });
                    }
                }
                last_use.insert(usage.resource, (node.id, usage.access));
            }
        }

        Ok(CompiledGraph {
            pass_order: sorted.iter().map(|&i| self.pass_nodes[i].id).collect(),
            resource_lifetimes,
            barriers,
        })
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[GraphResource] {
        &self.resources
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }

    pub(crate) fn pass_mut(&mut self, id: PassId) -> Option<&mut Box<dyn RenderPass<B>>> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        self.passes.get_mut(index)
    }

    /// Concrete pass behind `id`, if it has type `P`
    pub fn pass_as_mut<P: 'static>(&mut self, id: PassId) -> Option<&mut P> {
        self.pass_mut(id)?.as_any_mut().downcast_mut::<P>()
    }
}

impl<B: GraphicsBackend> Default for RenderGraph<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// Synchronisation point between two passes touching the same resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub after_pass: PassId,
    pub before_pass: PassId,
    pub from: ResourceAccess,
    pub to: ResourceAccess,
}

/// Compiled render graph with execution order, lifetimes and barriers
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
    pub barriers: Vec<Barrier>,
}

impl CompiledGraph {
    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        self.resource_lifetimes
            .get(&resource)
            .is_some_and(|lifetime| step >= lifetime.first_use && step <= lifetime.last_use)
    }

    /// Barriers that must be issued before `pass` runs
    pub fn barriers_before(&self, pass: PassId) -> impl Iterator<Item = &Barrier> {
        self.barriers.iter().filter(move |b| b.before_pass == pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, RecordingBackend};

    struct DeclaredPass {
        name: &'static str,
        reads: Vec<(ResourceId, ResourceAccess)>,
        writes: Vec<(ResourceId, ResourceAccess)>,
    }

    impl RenderPass<RecordingBackend> for DeclaredPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for &(id, access) in &self.reads {
                ctx.read(id, access);
            }
            for &(id, access) in &self.writes {
                ctx.write(id, access);
            }
        }

        fn execute(&mut self, _ctx: &mut PassExecuteContext<RecordingBackend>) -> BackendResult<()> {
            Ok(())
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn pass(
        name: &'static str,
        reads: Vec<(ResourceId, ResourceAccess)>,
        writes: Vec<(ResourceId, ResourceAccess)>,
    ) -> DeclaredPass {
        DeclaredPass {
            name,
            reads,
            writes,
        }
    }

    #[test]
    fn test_gbuffer_write_then_lighting_read_gets_barrier() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let albedo = graph.import_texture("albedo").unwrap();
        let out = graph.import_swapchain("swapchain").unwrap();

        let gbuffer = graph.add_pass(pass("gbuffer", vec![], vec![(albedo, ResourceAccess::RenderTarget)]));
        let lighting = graph.add_pass(pass(
            "lighting",
            vec![(albedo, ResourceAccess::ShaderRead)],
            vec![(out, ResourceAccess::RenderTarget)],
        ));

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order, vec![gbuffer, lighting]);

        let barrier = compiled.barriers_before(lighting).next().copied().unwrap();
        assert_eq!(barrier.resource, albedo);
        assert_eq!(barrier.from, ResourceAccess::RenderTarget);
        assert_eq!(barrier.to, ResourceAccess::ShaderRead);
    }

    #[test]
    fn test_independent_passes_keep_insertion_order() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let a = graph.import_texture("a").unwrap();
        let b = graph.import_texture("b").unwrap();
        let first = graph.add_pass(pass("first", vec![], vec![(a, ResourceAccess::RenderTarget)]));
        let second = graph.add_pass(pass("second", vec![], vec![(b, ResourceAccess::RenderTarget)]));

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_order, vec![first, second]);
        assert!(compiled.barriers.is_empty());
    }

    #[test]
    fn test_write_after_write_is_serialised_with_barrier() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let target = graph.import_swapchain("swapchain").unwrap();
        graph.add_pass(pass("lighting", vec![], vec![(target, ResourceAccess::RenderTarget)]));
        let skybox = graph.add_pass(pass("skybox", vec![], vec![(target, ResourceAccess::RenderTarget)]));

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.barriers_before(skybox).count(), 1);
    }

    #[test]
    fn test_consecutive_reads_need_no_barrier() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let tex = graph.import_texture("irradiance").unwrap();
        let out_a = graph.import_texture("a").unwrap();
        let out_b = graph.import_texture("b").unwrap();
        graph.add_pass(pass(
            "first",
            vec![(tex, ResourceAccess::ShaderRead)],
            vec![(out_a, ResourceAccess::RenderTarget)],
        ));
        graph.add_pass(pass(
            "second",
            vec![(tex, ResourceAccess::ShaderRead)],
            vec![(out_b, ResourceAccess::RenderTarget)],
        ));

        let compiled = graph.compile().unwrap();
        assert!(compiled.barriers.is_empty());
    }

    #[test]
    fn test_rejects_pass_sampling_its_own_target() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let tex = graph.import_texture("albedo").unwrap();
        graph.add_pass(pass(
            "feedback",
            vec![(tex, ResourceAccess::ShaderRead)],
            vec![(tex, ResourceAccess::RenderTarget)],
        ));

        assert!(matches!(
            graph.compile(),
            Err(RenderGraphError::ReadWriteHazard { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_resource() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        graph.add_pass(pass("orphan", vec![(ResourceId(42), ResourceAccess::ShaderRead)], vec![]));
        assert!(matches!(
            graph.compile(),
            Err(RenderGraphError::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_duplicate_import_is_an_error() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        graph.import_texture("depth").unwrap();
        assert!(graph.import_texture("depth").is_err());
    }

    #[test]
    fn test_resource_lifetimes_span_first_to_last_use() {
        let mut graph = RenderGraph::<RecordingBackend>::new();
        let depth = graph.import_texture("depth").unwrap();
        let other = graph.import_texture("other").unwrap();
        graph.add_pass(pass("write", vec![], vec![(depth, ResourceAccess::DepthStencilWrite)]));
        graph.add_pass(pass("unrelated", vec![], vec![(other, ResourceAccess::RenderTarget)]));
        graph.add_pass(pass("copy", vec![(depth, ResourceAccess::TransferSrc)], vec![]));

        let compiled = graph.compile().unwrap();
        assert!(compiled.is_resource_alive(depth, 0));
        assert!(compiled.is_resource_alive(depth, 2));
        assert!(!compiled.is_resource_alive(other, 0));
    }
}
