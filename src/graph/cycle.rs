//! Cycle detection and topological ordering
//!
//! Tarjan's strongly-connected-components algorithm drives cycle
//! detection. It runs on an explicit frame stack, never language
//! recursion: catalog graphs can be thousands of vertices deep and must
//! not risk exhausting the native call stack.

use super::{Direction, GraphVertex, RelationshipGraph};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Fatal error: the dependency graph contains at least one cycle
///
/// Carries the offending components plus example paths through each,
/// rendered into the error message for the user.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CycleError {
    /// The strongly connected components of size > 1, as vertex names
    pub cycles: Vec<Vec<String>>,
    message: String,
}

impl CycleError {
    fn new(cycles: Vec<Vec<String>>, paths: Vec<Vec<String>>) -> Self {
        let plural = if cycles.len() == 1 { "" } else { "s" };
        let mut message = format!("found {} dependency cycle{plural}:\n", cycles.len());
        let rendered: Vec<String> = paths
            .iter()
            .map(|path| format!("({})", path.join(" => ")))
            .collect();
        message.push_str(&rendered.join("\n"));
        Self { cycles, message }
    }
}

/// How many example paths to enumerate per cycle when reporting
const REPORT_PATHS_PER_CYCLE: usize = 10;

enum Step<V> {
    Enter,
    Children,
    AfterChild(V),
}

struct Frame<V> {
    node: V,
    step: Step<V>,
    // Unvisited children, popped back-to-front.
    children: Vec<V>,
}

struct TarjanState<V: GraphVertex> {
    number: usize,
    index: HashMap<V, usize>,
    lowlink: HashMap<V, usize>,
    stack: Vec<V>,
    on_stack: HashSet<V>,
    sccs: Vec<Vec<V>>,
}

impl<V: GraphVertex> RelationshipGraph<V> {
    /// Find all cycles: strongly connected components of size > 1
    ///
    /// Component members come out in discovery order; components and
    /// child visits are ordered by the vertices' textual form so the
    /// result is stable across runs.
    pub fn find_cycles(&self) -> Vec<Vec<V>> {
        let mut state = TarjanState {
            number: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            sccs: Vec::new(),
        };

        // Usually a disconnected graph; walk every possible root.
        let mut roots = self.vertices();
        roots.sort_by_key(ToString::to_string);
        for root in roots {
            if !state.index.contains_key(&root) {
                self.tarjan(root, &mut state);
            }
        }

        state.sccs.into_iter().filter(|scc| scc.len() > 1).collect()
    }

    /// One Tarjan traversal from `root`, on an explicit work stack
    fn tarjan(&self, root: V, s: &mut TarjanState<V>) {
        enum Next<V> {
            Recurse(V),
            Retire,
            Stay,
        }

        let mut frames = vec![Frame { node: root, step: Step::Enter, children: Vec::new() }];

        while !frames.is_empty() {
            let next = {
                let frame = frames.last_mut().expect("loop condition");
                let vertex = frame.node.clone();
                match std::mem::replace(&mut frame.step, Step::Children) {
                    Step::Enter => {
                        s.index.insert(vertex.clone(), s.number);
                        s.lowlink.insert(vertex.clone(), s.number);
                        s.number += 1;
                        s.stack.push(vertex.clone());
                        s.on_stack.insert(vertex.clone());

                        let mut children = self.adjacent(&vertex, Direction::Out);
                        children.sort_by_key(ToString::to_string);
                        children.reverse();
                        frame.children = children;
                        Next::Stay
                    }
                    Step::Children => {
                        if let Some(child) = frame.children.pop() {
                            if !s.index.contains_key(&child) {
                                frame.step = Step::AfterChild(child.clone());
                                Next::Recurse(child)
                            } else {
                                if s.on_stack.contains(&child) {
                                    let candidate = s.index[&child];
                                    let low = s.lowlink.get_mut(&vertex).expect("visited vertex");
                                    *low = (*low).min(candidate);
                                }
                                Next::Stay
                            }
                        } else {
                            if s.lowlink[&vertex] == s.index[&vertex] {
                                let mut scc = Vec::new();
                                loop {
                                    let top = s.stack.pop().expect("root still on stack");
                                    s.on_stack.remove(&top);
                                    let done = top == vertex;
                                    scc.push(top);
                                    if done {
                                        break;
                                    }
                                }
                                scc.reverse();
                                s.sccs.push(scc);
                            }
                            Next::Retire
                        }
                    }
                    Step::AfterChild(child) => {
                        let candidate = s.lowlink[&child];
                        let low = s.lowlink.get_mut(&vertex).expect("visited vertex");
                        *low = (*low).min(candidate);
                        Next::Stay
                    }
                }
            };

            match next {
                Next::Recurse(child) => {
                    frames.push(Frame { node: child, step: Step::Enter, children: Vec::new() });
                }
                Next::Retire => {
                    frames.pop();
                }
                Next::Stay => {}
            }
        }
    }

    /// Enumerate up to `max_paths` paths through a cycle's induced subgraph
    ///
    /// Breadth-first from the cycle's first member, so the shortest
    /// (most readable) paths come out first; a path terminates as soon
    /// as it returns to its own start vertex.
    pub fn paths_in_cycle(&self, cycle: &[V], max_paths: usize) -> Vec<Vec<V>> {
        assert!(max_paths >= 1, "max_paths must be positive");
        let members: HashSet<&V> = cycle.iter().collect();
        let mut adj: HashMap<&V, Vec<V>> = HashMap::new();
        for vertex in cycle {
            let mut next: Vec<V> = self
                .adjacent(vertex, Direction::Out)
                .into_iter()
                .filter(|n| members.contains(n))
                .collect();
            next.sort_by_key(ToString::to_string);
            adj.insert(vertex, next);
        }

        let mut found = Vec::new();
        let Some(start) = cycle.first() else {
            return found;
        };
        let mut queue: VecDeque<(V, Vec<V>)> = VecDeque::new();
        queue.push_back((start.clone(), Vec::new()));
        while let Some((vertex, path)) = queue.pop_front() {
            if path.contains(&vertex) {
                let mut complete = path;
                complete.push(vertex);
                found.push(complete);
                if found.len() >= max_paths {
                    break;
                }
            } else if let Some(next) = adj.get(&vertex) {
                for n in next {
                    let mut extended = path.clone();
                    extended.push(vertex.clone());
                    queue.push_back((n.clone(), extended));
                }
            }
        }
        found
    }

    /// Topological order via Kahn's algorithm
    ///
    /// Fails with a [`CycleError`] enumerating example paths when any
    /// vertex is left with positive in-degree.
    pub fn topsort(&self) -> Result<Vec<V>, CycleError> {
        let mut degree: HashMap<V, usize> = HashMap::new();
        let mut zeros: Vec<V> = Vec::new();
        let mut result = Vec::new();

        let mut vertices = self.vertices();
        vertices.sort_by_key(ToString::to_string);
        for v in vertices {
            let in_degree = self.direct_dependencies_of(&v).len();
            if in_degree == 0 {
                zeros.push(v.clone());
            }
            degree.insert(v, in_degree);
        }

        while let Some(v) = zeros.pop() {
            for dependent in self.direct_dependents_of(&v) {
                let d = degree.get_mut(&dependent).expect("edge endpoint is a vertex");
                *d -= 1;
                if *d == 0 {
                    zeros.push(dependent);
                }
            }
            result.push(v);
        }

        if degree.values().any(|d| *d > 0) {
            return Err(self.cycle_error());
        }
        Ok(result)
    }

    /// Fail with a reported [`CycleError`] if the graph has any cycle
    pub fn check_acyclic(&self) -> Result<(), CycleError> {
        let cycles = self.find_cycles();
        if cycles.is_empty() { Ok(()) } else { Err(self.cycle_error()) }
    }

    fn cycle_error(&self) -> CycleError {
        let cycles = self.find_cycles();
        let mut paths = Vec::new();
        for cycle in &cycles {
            for path in self.paths_in_cycle(cycle, REPORT_PATHS_PER_CYCLE) {
                paths.push(path.iter().map(ToString::to_string).collect());
            }
        }
        let named = cycles
            .iter()
            .map(|cycle| cycle.iter().map(ToString::to_string).collect())
            .collect();
        CycleError::new(named, paths)
    }
}
