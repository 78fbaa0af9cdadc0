//! Tree/DAG form of a pipeline.
//!
//! Nodes own processors. `subscribe(parent, child, position)` feeds the
//! parent's output into input slot `position` of the child. Sizes flow from
//! the root through each node's position-0 parent; a frame renders the root
//! and pushes each drawn output to its subscribers, so a multi-input node
//! draws once its last waited-for input arrives.
//!
//! Cycles are rejected at subscription time. Temporal feedback lives inside
//! [`IirProc`](crate::proc::IirProc), where a FIFO breaks the loop.

use crate::gpu::context::GpuContext;
use crate::gpu::types::{PixelFormat, TextureId, TextureTarget, TextureUnit};
use crate::proc::{ExternalInput, InputTexture, Processor};

pub type NodeId = usize;

struct Node {
    processor: Box<dyn Processor>,
    /// `(child, input position)`
    subscribers: Vec<(NodeId, usize)>,
    /// `(parent, input position)`
    parents: Vec<(NodeId, usize)>,
}

pub struct ProcGraph {
    gpu: GpuContext,
    nodes: Vec<Node>,
    root: Option<NodeId>,
    output: Option<NodeId>,
    use_mipmaps: bool,
    prepared: Option<(u32, u32, PixelFormat)>,
    external_texture: Option<InputTexture>,
    input: ExternalInput,
}

impl ProcGraph {
    pub fn new(gpu: &GpuContext) -> Self {
        Self {
            gpu: gpu.clone(),
            nodes: Vec::new(),
            root: None,
            output: None,
            use_mipmaps: true,
            prepared: None,
            external_texture: None,
            input: ExternalInput::default(),
        }
    }

    /// Add a node. The first node added is the root and the most recently
    /// added one is the output until set otherwise.
    pub fn add_node(&mut self, processor: impl Processor + 'static) -> NodeId {
        assert!(self.prepared.is_none(), "cannot add nodes after prepare()");
        let id = self.nodes.len();
        self.nodes.push(Node {
            processor: Box::new(processor),
            subscribers: Vec::new(),
            parents: Vec::new(),
        });
        self.root.get_or_insert(id);
        self.output = Some(id);
        id
    }

    pub fn set_root(&mut self, node: NodeId) {
        self.check_node(node);
        self.root = Some(node);
    }

    pub fn set_output(&mut self, node: NodeId) {
        self.check_node(node);
        self.output = Some(node);
    }

    pub fn set_use_mipmaps(&mut self, enabled: bool) {
        self.use_mipmaps = enabled;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn processor(&self, node: NodeId) -> &dyn Processor {
        self.nodes[node].processor.as_ref()
    }

    pub fn processor_mut(&mut self, node: NodeId) -> &mut dyn Processor {
        self.nodes[node].processor.as_mut()
    }

    fn check_node(&self, node: NodeId) {
        assert!(node < self.nodes.len(), "unknown node {}", node);
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if std::mem::replace(&mut seen[n], true) {
                continue;
            }
            stack.extend(self.nodes[n].subscribers.iter().map(|&(child, _)| child));
        }
        false
    }

    /// Feed `parent`'s output into input slot `position` of `child`.
    pub fn subscribe(&mut self, parent: NodeId, child: NodeId, position: usize) {
        assert!(self.prepared.is_none(), "cannot subscribe after prepare()");
        self.check_node(parent);
        self.check_node(child);
        assert!(
            !self.reaches(child, parent),
            "subscribing {} to {} would create a cycle",
            self.nodes[child].processor.name(),
            self.nodes[parent].processor.name()
        );
        assert!(
            self.nodes[child].parents.iter().all(|&(_, pos)| pos != position),
            "input {} of {} is already subscribed",
            position,
            self.nodes[child].processor.name()
        );
        self.nodes[parent].subscribers.push((child, position));
        self.nodes[child].parents.push((parent, position));
    }

    /// Nodes reachable from the root, parents before children.
    fn topological_order(&self, root: NodeId) -> Vec<NodeId> {
        fn visit(graph: &ProcGraph, node: NodeId, seen: &mut [bool], post: &mut Vec<NodeId>) {
            if std::mem::replace(&mut seen[node], true) {
                return;
            }
            for &(child, _) in &graph.nodes[node].subscribers {
                visit(graph, child, seen, post);
            }
            post.push(node);
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut post = Vec::with_capacity(self.nodes.len());
        visit(self, root, &mut seen, &mut post);
        post.reverse();
        post
    }

    /// The parent whose output size sets `node`'s input size.
    fn size_parent(&self, node: NodeId) -> Option<NodeId> {
        let parents = &self.nodes[node].parents;
        parents
            .iter()
            .find(|&&(_, pos)| pos == 0)
            .or_else(|| parents.first())
            .map(|&(parent, _)| parent)
    }

    pub fn prepare(&mut self, width: u32, height: u32, format: PixelFormat) {
        let Some(root) = self.root else {
            panic!("prepare() on an empty graph");
        };
        assert!(
            width > 0 && height > 0,
            "input frame size must be positive, got {}x{}",
            width,
            height
        );
        if self.prepared == Some((width, height, format)) {
            return;
        }
        let format_changed = self.prepared.is_some_and(|(_, _, f)| f != format);
        let order = self.topological_order(root);
        if order.len() < self.nodes.len() {
            log::warn!(
                "{} node(s) are not reachable from the root and will not render",
                self.nodes.len() - order.len()
            );
        }

        self.gpu.finish();
        let prepare_upload = self.external_texture.is_none();
        self.nodes[root].processor.set_input_format(format);

        for (index, &node) in order.iter().enumerate() {
            let (w, h) = match self.size_parent(node) {
                Some(parent) if node != root => self.nodes[parent].processor.out_frame_size(),
                _ => (width, height),
            };
            let for_upload = node == root && prepare_upload;
            let proc = &mut self.nodes[node].processor;
            if !proc.is_initialized() || (node == root && format_changed) {
                proc.init(w, h, index, for_upload);
            } else {
                proc.reinit(w, h, for_upload);
            }
        }

        for &node in &order {
            let gen_mipmap = self.use_mipmaps
                && self.nodes[node]
                    .subscribers
                    .iter()
                    .any(|&(child, _)| self.nodes[child].processor.will_downscale());
            self.nodes[node].processor.create_fbo_tex(gen_mipmap);
            let out = self.nodes[node].processor.out_frame_size();
            let children: Vec<NodeId> = self.nodes[node].subscribers.iter().map(|&(c, _)| c).collect();
            for child in children {
                if self.size_parent(child) == Some(node) && self.nodes[child].processor.in_frame_size() != out {
                    self.nodes[child].processor.reinit(out.0, out.1, false);
                }
            }
        }

        self.input = self.nodes[root].processor.external_input();
        self.prepared = Some((width, height, format));
        for &node in &order {
            self.nodes[node].processor.print_info();
        }
    }

    pub fn set_input_texture(&mut self, id: TextureId, target: TextureTarget) {
        self.external_texture = id
            .is_valid()
            .then(|| InputTexture::new(id, TextureUnit(0), target));
    }

    pub fn set_input_data(&mut self, pixels: &[u8]) {
        let (Some(root), Some((width, height, format))) = (self.root, self.prepared) else {
            panic!("set_input_data() called before prepare()");
        };
        let expected = format.buffer_len(width, height);
        if pixels.len() < expected {
            log::error!("input buffer holds {} bytes, graph input needs {}", pixels.len(), expected);
            return;
        }
        self.gpu.finish();
        self.nodes[root].processor.set_external_input_data(pixels);
    }

    /// Render one frame from the root down.
    pub fn process(&mut self) {
        let (Some(root), Some(_)) = (self.root, self.prepared) else {
            panic!("process() called before prepare()");
        };
        let mut position = 0;
        let proc = &mut self.nodes[root].processor;
        match self.external_texture {
            Some(texture) => proc.use_texture(texture, 0),
            None => {
                proc.use_texture(InputTexture::texture_2d(self.input.primary, TextureUnit(0)), 0);
                if self.input.chroma.is_valid() {
                    proc.use_texture(InputTexture::texture_2d(self.input.chroma, TextureUnit(1)), 1);
                    position = 1;
                }
            }
        }
        self.propagate(root, position);
    }

    fn propagate(&mut self, node: NodeId, position: usize) {
        if !self.nodes[node].processor.render(position) {
            return;
        }
        self.gpu.finish();
        let proc = &self.nodes[node].processor;
        let texture = InputTexture::texture_2d(proc.output_texture(), proc.texture_unit());
        let subscribers = self.nodes[node].subscribers.clone();
        for (child, pos) in subscribers {
            self.nodes[child].processor.use_texture(texture, pos);
            self.propagate(child, pos);
        }
    }

    pub fn output_frame_size(&self) -> (u32, u32) {
        self.output
            .map(|n| self.nodes[n].processor.out_frame_size())
            .unwrap_or((0, 0))
    }

    pub fn output_data(&mut self, buf: &mut [u8]) {
        let (Some(output), Some(_)) = (self.output, self.prepared) else {
            panic!("output_data() called before prepare()");
        };
        self.gpu.finish();
        self.nodes[output].processor.result_data(buf);
    }

    /// Read any node's output (RGBA8) into `buf`.
    pub fn node_data(&mut self, node: NodeId, buf: &mut [u8]) {
        self.check_node(node);
        self.gpu.finish();
        self.nodes[node].processor.result_data(buf);
    }

    pub fn cleanup(&mut self) {
        self.gpu.finish();
        for node in &mut self.nodes {
            node.processor.cleanup();
        }
        self.prepared = None;
        self.input = ExternalInput::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::noop::noop;
    use crate::proc::OutputSize;

    #[test]
    #[should_panic(expected = "cycle")]
    fn test_cycle_rejected() {
        let gpu = GpuContext::software();
        let mut graph = ProcGraph::new(&gpu);
        let a = graph.add_node(noop(&gpu));
        let b = graph.add_node(noop(&gpu));
        let c = graph.add_node(noop(&gpu));
        graph.subscribe(a, b, 0);
        graph.subscribe(b, c, 0);
        graph.subscribe(c, a, 0);
    }

    #[test]
    #[should_panic(expected = "already subscribed")]
    fn test_double_subscription_rejected() {
        let gpu = GpuContext::software();
        let mut graph = ProcGraph::new(&gpu);
        let a = graph.add_node(noop(&gpu));
        let b = graph.add_node(noop(&gpu));
        let c = graph.add_node(noop(&gpu));
        graph.subscribe(a, c, 0);
        graph.subscribe(b, c, 0);
    }

    #[test]
    fn test_topological_order_parents_first() {
        let gpu = GpuContext::software();
        let mut graph = ProcGraph::new(&gpu);
        let a = graph.add_node(noop(&gpu));
        let b = graph.add_node(noop(&gpu));
        let c = graph.add_node(noop(&gpu));
        let d = graph.add_node(noop(&gpu));
        graph.subscribe(a, c, 0);
        graph.subscribe(c, d, 0);
        graph.subscribe(a, b, 0);
        graph.subscribe(b, d, 1);
        let order = graph.topological_order(a);
        let pos = |n| order.iter().position(|&x| x == n).expect("reachable");
        assert_eq!(order.len(), 4);
        assert!(pos(a) < pos(b) && pos(a) < pos(c));
        assert!(pos(b) < pos(d) && pos(c) < pos(d));
    }

    #[test]
    fn test_sizes_follow_position_zero_parent() {
        let gpu = GpuContext::software();
        let mut graph = ProcGraph::new(&gpu);
        graph.set_use_mipmaps(false);
        let root = graph.add_node(noop(&gpu));
        let half = graph.add_node(noop(&gpu).with_output_size(OutputSize::Scale(0.5)));
        let tail = graph.add_node(noop(&gpu));
        graph.subscribe(root, half, 0);
        graph.subscribe(half, tail, 0);
        graph.prepare(40, 20, PixelFormat::Rgba);
        assert_eq!(graph.processor(half).out_frame_size(), (20, 10));
        assert_eq!(graph.output_frame_size(), (20, 10));
    }
}
