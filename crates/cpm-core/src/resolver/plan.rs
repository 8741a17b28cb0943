//! Install plans: the resolved graph, its install order and its conflicts.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;

use cpm_schema::{Manifest, PackageName, Version};

use crate::error::{ErrorKind, Rejection};

/// Index of a node inside its [`InstallPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position in [`InstallPlan::nodes`].
    pub fn index(self) -> usize {
        self.0
    }
}

/// One selected package.
#[derive(Debug, Clone)]
pub struct DepNode {
    /// Package name.
    pub name: PackageName,
    /// Selected version.
    pub version: Version,
    /// Where the installer fetches the artifact from. Empty for the root.
    pub resolved_url: String,
    /// Direct dependencies, by id within the same plan.
    pub children: Vec<NodeId>,
    /// Already present in the modules directory at this version.
    pub installed: bool,
    /// The selected version's manifest.
    pub manifest: Arc<Manifest>,
}

impl DepNode {
    /// `name@version`.
    pub fn id_string(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Why a plan cannot be executed as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// The registry does not know the package.
    NotFound,
    /// No available version satisfies a constraint.
    Unsatisfiable,
    /// Two edges on the same name cannot both be met.
    Version,
    /// The dependency path loops back on itself.
    Cycle,
    /// The resolution depth cap was reached.
    DepthExceeded,
}

impl ConflictKind {
    /// The taxonomy kind reported when this conflict stops an install.
    pub fn error_kind(self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Unsatisfiable => ErrorKind::ConstraintUnsatisfiable,
            Self::Version => ErrorKind::Conflict,
            Self::Cycle => ErrorKind::Cycle,
            Self::DepthExceeded => ErrorKind::ResolutionLimitExceeded,
        }
    }
}

/// A recorded resolution problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// What went wrong.
    pub kind: ConflictKind,
    /// The package the problem is about.
    pub package: PackageName,
    /// Human-readable explanation.
    pub description: String,
}

impl Conflict {
    pub(crate) fn new(kind: ConflictKind, package: &PackageName, description: String) -> Self {
        Self {
            kind,
            package: package.clone(),
            description,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Output of resolution.
///
/// The graph is acyclic and every node is reachable from the root. The
/// install order lists dependencies before dependents, breaks ties by
/// name, and ends with the root. A plan with conflicts is still returned
/// in full; [`InstallPlan::is_valid`] tells whether it may be executed.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    nodes: Vec<DepNode>,
    root: NodeId,
    order: Vec<NodeId>,
    conflicts: Vec<Conflict>,
}

impl InstallPlan {
    /// Build a plan from a raw graph: drop every node named in `excluded`,
    /// keep what is still reachable from `root`, and order it.
    pub(crate) fn assemble(
        nodes: Vec<DepNode>,
        root: NodeId,
        excluded: &HashSet<PackageName>,
        conflicts: Vec<Conflict>,
    ) -> Self {
        let (nodes, root) = compact(nodes, root, excluded);
        let order = install_order(&nodes);
        Self {
            nodes,
            root,
            order,
            conflicts,
        }
    }

    /// The root project's node.
    pub fn root(&self) -> &DepNode {
        &self.nodes[self.root.0]
    }

    /// Id of [`root`](Self::root).
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> &DepNode {
        &self.nodes[id.0]
    }

    /// All nodes, indexed by [`NodeId`].
    pub fn nodes(&self) -> &[DepNode] {
        &self.nodes
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Never true for a plan built by the resolver.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids, dependencies first, root last.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Nodes in install order.
    pub fn install_order(&self) -> impl Iterator<Item = &DepNode> {
        self.order.iter().map(|id| &self.nodes[id.0])
    }

    /// Problems recorded during resolution, in discovery order.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// A plan is executable only when it has no conflicts.
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// The first conflict as a rejection, if any.
    pub fn error(&self) -> Option<Rejection> {
        self.conflicts.first().map(|c| {
            let message = if self.conflicts.len() == 1 {
                c.description.clone()
            } else {
                format!("{} (and {} more)", c.description, self.conflicts.len() - 1)
            };
            Rejection::new(c.kind.error_kind(), message)
        })
    }

    /// The node selected for `name`.
    pub fn find(&self, name: &str) -> Option<&DepNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Group the install order into layers: a node's layer is one more
    /// than the highest layer among its children. Nodes within a layer do
    /// not depend on each other.
    pub fn layers(&self) -> Vec<Vec<NodeId>> {
        let mut layer_of = vec![0usize; self.nodes.len()];
        for id in &self.order {
            layer_of[id.0] = self.nodes[id.0]
                .children
                .iter()
                .map(|c| layer_of[c.0] + 1)
                .max()
                .unwrap_or(0);
        }

        let mut layers: Vec<Vec<NodeId>> = Vec::new();
        for id in &self.order {
            let layer = layer_of[id.0];
            if layers.len() <= layer {
                layers.resize_with(layer + 1, Vec::new);
            }
            layers[layer].push(*id);
        }
        layers
    }

    /// The dependency tree as text. Subtrees already printed are marked
    /// `(*)` instead of being repeated.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let root = self.root();
        let _ = writeln!(out, "{}", root.id_string());
        let mut seen = HashSet::from([self.root]);
        self.render_children(self.root, "", &mut seen, &mut out);
        out
    }

    fn render_children(&self, id: NodeId, prefix: &str, seen: &mut HashSet<NodeId>, out: &mut String) {
        let children = &self.nodes[id.0].children;
        for (i, child) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            let branch = if last { "└── " } else { "├── " };
            let node = &self.nodes[child.0];
            let first_visit = seen.insert(*child);
            let marker = if first_visit || node.children.is_empty() { "" } else { " (*)" };
            let _ = writeln!(out, "{prefix}{branch}{}{marker}", node.id_string());
            if first_visit {
                let extension = if last { "    " } else { "│   " };
                self.render_children(*child, &format!("{prefix}{extension}"), seen, out);
            }
        }
    }
}

/// Remove excluded names, then keep only what the root still reaches.
fn compact(nodes: Vec<DepNode>, root: NodeId, excluded: &HashSet<PackageName>) -> (Vec<DepNode>, NodeId) {
    let keep = |id: NodeId| id == root || !excluded.contains(&nodes[id.0].name);

    let mut reachable = vec![false; nodes.len()];
    let mut stack = vec![root];
    reachable[root.0] = true;
    while let Some(id) = stack.pop() {
        for child in &nodes[id.0].children {
            if keep(*child) && !reachable[child.0] {
                reachable[child.0] = true;
                stack.push(*child);
            }
        }
    }

    let mut remap = HashMap::new();
    for (old, _) in reachable.iter().enumerate().filter(|(_, r)| **r) {
        let new = NodeId(remap.len());
        remap.insert(NodeId(old), new);
    }

    let compacted = nodes
        .into_iter()
        .enumerate()
        .filter(|(old, _)| reachable[*old])
        .map(|(_, mut node)| {
            node.children = node
                .children
                .iter()
                .filter_map(|c| remap.get(c).copied())
                .collect();
            node
        })
        .collect();

    (compacted, remap[&root])
}

/// Kahn's algorithm over "depends on" edges: a node becomes ready once all
/// of its children are placed. Ready nodes are taken in (name, version)
/// order so the result is deterministic.
fn install_order(nodes: &[DepNode]) -> Vec<NodeId> {
    let mut remaining: Vec<usize> = nodes.iter().map(|n| n.children.len()).collect();
    let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for child in &node.children {
            dependents[child.0].push(NodeId(i));
        }
    }

    let mut ready: BTreeSet<(&PackageName, &Version, NodeId)> = nodes
        .iter()
        .enumerate()
        .filter(|(i, _)| remaining[*i] == 0)
        .map(|(i, n)| (&n.name, &n.version, NodeId(i)))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, _, id)) = ready.pop_first() {
        order.push(id);
        for parent in &dependents[id.0] {
            remaining[parent.0] -= 1;
            if remaining[parent.0] == 0 {
                let node = &nodes[parent.0];
                ready.insert((&node.name, &node.version, *parent));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, version: &str, children: &[usize]) -> DepNode {
        let name = PackageName::new(name);
        let version = Version::parse(version).unwrap();
        DepNode {
            manifest: Arc::new(Manifest::new(name.clone(), version.clone())),
            name,
            version,
            resolved_url: String::new(),
            children: children.iter().map(|&c| NodeId(c)).collect(),
            installed: false,
        }
    }

    fn names(plan: &InstallPlan) -> Vec<String> {
        plan.install_order().map(|n| n.name.to_string()).collect()
    }

    fn diamond() -> Vec<DepNode> {
        vec![
            node("app", "1.0.0", &[1, 2]),
            node("b", "2.0.0", &[3]),
            node("a", "1.2.0", &[3]),
            node("c", "1.2.0", &[]),
        ]
    }

    #[test]
    fn test_order_is_dependencies_first_with_name_ties() {
        let plan = InstallPlan::assemble(diamond(), NodeId(0), &HashSet::new(), Vec::new());
        assert_eq!(names(&plan), ["c", "a", "b", "app"]);
        assert!(plan.is_valid());
    }

    #[test]
    fn test_excluded_names_and_unreachable_nodes_are_dropped() {
        let mut nodes = diamond();
        nodes.push(node("orphan", "0.1.0", &[]));
        let excluded = HashSet::from([PackageName::new("b")]);
        let conflicts = vec![Conflict::new(
            ConflictKind::Version,
            &PackageName::new("b"),
            "b conflicts".into(),
        )];

        let plan = InstallPlan::assemble(nodes, NodeId(0), &excluded, conflicts);
        assert_eq!(names(&plan), ["c", "a", "app"]);
        assert_eq!(plan.root().children.len(), 1);
        assert!(!plan.is_valid());
        assert_eq!(plan.error().unwrap().kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_layers() {
        let plan = InstallPlan::assemble(diamond(), NodeId(0), &HashSet::new(), Vec::new());
        let layers: Vec<Vec<String>> = plan
            .layers()
            .iter()
            .map(|l| l.iter().map(|id| plan.node(*id).name.to_string()).collect())
            .collect();
        assert_eq!(layers, vec![vec!["c"], vec!["a", "b"], vec!["app"]]);
    }

    #[test]
    fn test_render_tree_marks_repeats() {
        let mut nodes = diamond();
        nodes.push(node("z", "1.0.0", &[]));
        nodes[3].children.push(NodeId(4));
        let plan = InstallPlan::assemble(nodes, NodeId(0), &HashSet::new(), Vec::new());
        let tree = plan.render_tree();
        let expected = "\
app@1.0.0
├── b@2.0.0
│   └── c@1.2.0
│       └── z@1.0.0
└── a@1.2.0
    └── c@1.2.0 (*)
";
        assert_eq!(tree, expected);
    }
}
