//! Validated task tree over a flat record set.
//!
//! `TaskTree` is built from a flat array of records and rejects malformed
//! input: duplicate ids, zero or multiple roots, records unreachable from
//! the root, dangling dependency references, and dependency cycles. Two
//! relations coexist over the same records: the containment tree
//! (parent -> children) and the dependency graph, kept as separate index
//! structures built once at validation time.

use crate::core::record::{Dependency, TaskId, TaskRecord, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// An immutable, validated view over a set of task records.
pub struct TaskTree {
    /// All records, indexed by id.
    records: HashMap<TaskId, TaskRecord>,
    /// The single containment root.
    root: TaskId,
    /// Containment index: parent -> children, sorted by descending
    /// priority with submission order as the stable tie-break.
    children: HashMap<TaskId, Vec<TaskId>>,
    /// Ids in submission order.
    ordered: Vec<TaskId>,
    /// Submission position per id.
    order: HashMap<TaskId, usize>,
    /// Dependency graph: an edge dep -> dependent, weighted by `required`.
    graph: DiGraph<TaskId, bool>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    node_index: HashMap<TaskId, NodeIndex>,
}

impl TaskTree {
    /// Build and validate a tree from a flat record set.
    ///
    /// # Errors
    /// Returns an error if the set is empty, contains duplicate ids, has
    /// zero or more than one root, contains records unreachable from the
    /// root, references dependencies outside the set, or has a cycle in
    /// the dependency graph.
    pub fn build(tasks: Vec<TaskRecord>) -> Result<Self> {
        Self::assemble(tasks, false)
    }

    /// Shared constructor for fresh submissions and copy trees.
    ///
    /// Copy trees may legitimately reference dependencies outside the
    /// set (un-copied, already-completed originals); those references
    /// get no graph edge and are resolved through the store at
    /// execution time.
    fn assemble(tasks: Vec<TaskRecord>, allow_external_deps: bool) -> Result<Self> {
        if tasks.is_empty() {
            return Err(Error::EmptySubmission);
        }

        // Index by id, rejecting duplicates; remember submission order.
        let mut records: HashMap<TaskId, TaskRecord> = HashMap::with_capacity(tasks.len());
        let mut ordered: Vec<TaskId> = Vec::with_capacity(tasks.len());
        for task in tasks {
            if records.contains_key(&task.id) {
                return Err(Error::DuplicateTask { id: task.id });
            }
            ordered.push(task.id);
            records.insert(task.id, task);
        }
        let order: HashMap<TaskId, usize> =
            ordered.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        // A record is a root when its parent is empty or absent from the set.
        let roots: Vec<TaskId> = ordered
            .iter()
            .copied()
            .filter(|id| match records[id].parent_id {
                None => true,
                Some(parent) => !records.contains_key(&parent),
            })
            .collect();
        if roots.is_empty() {
            return Err(Error::NoRoot);
        }
        if roots.len() > 1 {
            return Err(Error::MultipleRoots { roots });
        }
        let root = roots[0];

        // Containment index, grouped on parent_id.
        let mut children: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for id in &ordered {
            if let Some(parent) = records[id].parent_id {
                if records.contains_key(&parent) {
                    children.entry(parent).or_default().push(*id);
                }
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|id| (-records[id].priority, order[id]));
        }

        // Every record must be reachable from the root via parent -> children.
        let mut reached: HashSet<TaskId> = HashSet::with_capacity(records.len());
        let mut queue = VecDeque::from([root]);
        reached.insert(root);
        while let Some(current) = queue.pop_front() {
            for child in children.get(&current).map(Vec::as_slice).unwrap_or(&[]) {
                if reached.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
        if reached.len() != records.len() {
            let unreached = ordered
                .iter()
                .copied()
                .find(|id| !reached.contains(id))
                .unwrap_or(root);
            return Err(Error::UnreachableTask { id: unreached });
        }

        // Dependency graph. References must resolve within the set unless
        // the caller explicitly allows external (completed-original) refs.
        let mut graph: DiGraph<TaskId, bool> = DiGraph::new();
        let mut node_index: HashMap<TaskId, NodeIndex> = HashMap::with_capacity(records.len());
        for id in &ordered {
            node_index.insert(*id, graph.add_node(*id));
        }
        for id in &ordered {
            for dep in &records[id].dependencies {
                match node_index.get(&dep.task_id) {
                    Some(&dep_idx) => {
                        graph.add_edge(dep_idx, node_index[id], dep.required);
                    }
                    None if allow_external_deps => {}
                    None => {
                        return Err(Error::MissingDependent {
                            task_id: *id,
                            missing: dep.task_id,
                        });
                    }
                }
            }
        }

        // Cycle check over dependency edges only.
        if let Err(cycle) = toposort(&graph, None) {
            let on_cycle = graph[cycle.node_id()];
            let cycle = recover_cycle(&graph, &node_index, on_cycle);
            return Err(Error::CircularDependency { cycle });
        }

        Ok(Self {
            records,
            root,
            children,
            ordered,
            order,
            graph,
            node_index,
        })
    }

    /// Derive a minimal re-runnable copy of the subgraph around a task.
    ///
    /// The copy contains the task itself plus the transitive closure of
    /// its dependents; when the task is a failed containment-leaf,
    /// dependents that are still `pending` (never attempted) are left
    /// out and not traversed through. Every included record is cloned
    /// with a fresh id, reset to `pending`, and rewired: references to
    /// copied tasks point at the sibling clone, references to un-copied
    /// (already-completed) tasks stay on the original. Clones whose
    /// original parent is not copied attach to the copy root.
    ///
    /// # Errors
    /// Returns `TaskNotFound` if `task_id` is absent from this tree.
    pub fn build_copy(&self, task_id: &TaskId) -> Result<TaskTree> {
        let source = self
            .records
            .get(task_id)
            .ok_or(Error::TaskNotFound { id: *task_id })?;
        let exclude_pending =
            source.status == TaskStatus::Failed && self.is_leaf(task_id);

        let mut included: Vec<TaskId> = vec![*task_id];
        let mut seen: HashSet<TaskId> = HashSet::from([*task_id]);
        let mut queue = VecDeque::from([*task_id]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if seen.contains(&dependent) {
                    continue;
                }
                if exclude_pending && self.records[&dependent].status == TaskStatus::Pending {
                    continue;
                }
                seen.insert(dependent);
                included.push(dependent);
                queue.push_back(dependent);
            }
        }
        included.sort_by_key(|id| self.order[id]);

        let mapping: HashMap<TaskId, TaskId> =
            included.iter().map(|old| (*old, TaskId::new())).collect();

        let mut clones = Vec::with_capacity(included.len());
        for old_id in &included {
            let original = &self.records[old_id];
            let mut clone = original.clone_for_rerun();
            clone.id = mapping[old_id];
            clone.parent_id = if old_id == task_id {
                None
            } else {
                original
                    .parent_id
                    .and_then(|p| mapping.get(&p).copied())
                    .or(Some(mapping[task_id]))
            };
            clone.dependencies = original
                .dependencies
                .iter()
                .map(|dep| Dependency {
                    task_id: mapping.get(&dep.task_id).copied().unwrap_or(dep.task_id),
                    required: dep.required,
                })
                .collect();
            clones.push(clone);
        }

        Self::assemble(clones, true)
    }

    /// Id of the containment root.
    pub fn root_id(&self) -> TaskId {
        self.root
    }

    /// The root record.
    pub fn root(&self) -> &TaskRecord {
        &self.records[&self.root]
    }

    /// Look up a record by id.
    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    /// Check if the tree contains a record.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.records.contains_key(id)
    }

    /// Number of records in the tree.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the tree is empty (never true for a built tree).
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in submission order.
    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.ordered.iter().map(|id| &self.records[id])
    }

    /// Children of a task, sorted by descending priority then
    /// submission order.
    pub fn children(&self, id: &TaskId) -> &[TaskId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check if a task has no children in the containment tree.
    pub fn is_leaf(&self, id: &TaskId) -> bool {
        self.children(id).is_empty()
    }

    /// Declared dependency edges of a task.
    pub fn dependencies(&self, id: &TaskId) -> &[Dependency] {
        self.records
            .get(id)
            .map(|r| r.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Tasks that directly depend on the given task.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&index) = self.node_index.get(id) else {
            return Vec::new();
        };
        let mut dependents: Vec<TaskId> = self
            .graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .map(|neighbor| self.graph[neighbor])
            .collect();
        dependents.sort_by_key(|id| self.order[id]);
        dependents
    }

    /// Transitive closure of dependents of the given task.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let mut all = Vec::new();
        let mut seen: HashSet<TaskId> = HashSet::from([*id]);
        let mut queue = VecDeque::from([*id]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if seen.insert(dependent) {
                    all.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }
        all.sort_by_key(|id| self.order[id]);
        all
    }

    /// Position of a task in the original submission.
    pub fn submission_order(&self, id: &TaskId) -> Option<usize> {
        self.order.get(id).copied()
    }

    /// Number of dependency edges resolved inside the tree.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl std::fmt::Debug for TaskTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTree")
            .field("root", &self.root)
            .field("tasks", &self.records.len())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}

/// Walk dependency edges from a node known to sit on a cycle and return
/// the cycle members, starting and ending implicitly at `start`.
fn recover_cycle(
    graph: &DiGraph<TaskId, bool>,
    node_index: &HashMap<TaskId, NodeIndex>,
    start: TaskId,
) -> Vec<TaskId> {
    fn walk(
        graph: &DiGraph<TaskId, bool>,
        current: NodeIndex,
        start: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> bool {
        for next in graph.neighbors_directed(current, petgraph::Direction::Outgoing) {
            if next == start {
                return true;
            }
            if visited.insert(next) {
                path.push(next);
                if walk(graph, next, start, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    let start_idx = node_index[&start];
    let mut visited = HashSet::from([start_idx]);
    let mut path = vec![start_idx];
    if walk(graph, start_idx, start_idx, &mut visited, &mut path) {
        path.into_iter().map(|idx| graph[idx]).collect()
    } else {
        vec![start]
    }
}
