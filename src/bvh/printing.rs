use std::{
    fmt::Display,
    io::{self, Write},
    time::Duration,
};

use crate::util::Stats;

use super::{Bvh, NodeIdx, NodeLink};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildStrategy {
    Recursive,
    /// Groups of primitives built in parallel and merged under a top level tree
    MiniTrees { groups: usize },
}

/// Summary of a finished build.
#[derive(Clone, Debug)]
pub struct BuildStatistics {
    pub strategy: BuildStrategy,
    pub node_count: usize,
    pub leaf_count: usize,
    /// Depth of leaves, the root alone has depth 1
    pub depth: Stats,
    /// Number of primitives per leaf
    pub leaf_size: Stats,
    pub duration: Duration,
}

impl Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStrategy::Recursive => write!(f, "recursive"),
            BuildStrategy::MiniTrees { groups } => write!(f, "mini-trees ({groups} groups)"),
        }
    }
}

impl Display for BuildStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Strategy: {}", self.strategy)?;
        writeln!(f, "Nodes: {}", self.node_count)?;
        writeln!(f, "Leaves: {}", self.leaf_count)?;
        writeln!(f, "Depth: {}", self.depth)?;
        writeln!(f, "Leaf size: {}", self.leaf_size)?;
        write!(f, "Build time: {:.3?}", self.duration)
    }
}

impl Bvh {
    pub(super) fn statistics(&self, strategy: BuildStrategy, duration: Duration) -> BuildStatistics {
        let leaf_size = self.leaf_size_statistics();
        BuildStatistics {
            strategy,
            node_count: self.nodes.len(),
            leaf_count: leaf_size.count,
            depth: self.depth_statistics(),
            leaf_size,
            duration,
        }
    }

    pub fn print_tree(&self) -> io::Result<()> {
        self.write_tree(&mut io::stdout().lock())
    }

    /// Writes one line per node, children indented below their parent.
    pub fn write_tree(&self, out: &mut impl Write) -> io::Result<()> {
        self.write_recursive(out, 0, Bvh::ROOT)
    }

    /// Depth of every leaf reachable from the root.
    pub fn depth_statistics(&self) -> Stats {
        let mut stats = Stats::default();
        let mut stack = vec![(Bvh::ROOT, 1)];

        while let Some((index, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            match node.link {
                NodeLink::Leaf { .. } => stats.add_sample(depth),
                NodeLink::Inner { children } => {
                    stack.extend(children.map(|child| (child, depth + 1)));
                }
            }
        }

        stats
    }

    pub fn leaf_size_statistics(&self) -> Stats {
        self.nodes
            .iter()
            .filter_map(|node| node.leaf_range())
            .map(|range| range.len())
            .collect()
    }

    fn write_recursive(
        &self,
        out: &mut impl Write,
        indent: usize,
        index: NodeIdx,
    ) -> io::Result<()> {
        let indent_str = "  ".repeat(indent);
        let Ok(node) = self.node(index) else {
            return writeln!(out, "{indent_str}- <missing node {}>", index.index());
        };

        match &node.link {
            NodeLink::Leaf { primitives } => writeln!(
                out,
                "{indent_str}- L{}: {:?}-{:?} {:?}",
                index.index(),
                node.bounding_box.min,
                node.bounding_box.max,
                self.primitive_ids.get(primitives.clone()).unwrap_or_default(),
            ),
            NodeLink::Inner { children } => {
                writeln!(
                    out,
                    "{indent_str}- I{}: {:?}-{:?}",
                    index.index(),
                    node.bounding_box.min,
                    node.bounding_box.max,
                )?;
                for child in children {
                    self.write_recursive(out, indent + 1, *child)?;
                }
                Ok(())
            }
        }
    }
}
