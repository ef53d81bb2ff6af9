use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::Environment;
use crate::error::BlueprintError;
use crate::pipeline::Pipeline;
use crate::resource::{ResourceCategory, ResourceMap, Source};
use crate::task::{Task, TaskKind};
use crate::transform::Transform;

/// Handle to a registered [`ResourceCategory`], used to bind it to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resource(usize);

/// The blueprint for your build.
///
/// `Blueprint` is used to declare the resource categories of a project and
/// the task that processes each of them. A `clean` task is always present;
/// every other task runs after it during a full build.
///
/// Once configured, you convert this into a [`Pipeline`] to execute it.
///
/// # Example
///
/// ```rust,no_run
/// use kamado::{Blueprint, transform::Styles};
///
/// let mut config = Blueprint::new();
///
/// let styles = config
///     .category("styles")
///     .entry("src/styles/styles.less")
///     .watch("src/styles/**/*.less")
///     .destination("styles")
///     .register()?;
///
/// config.task("styles", styles).run(Styles::new())?;
///
/// let pipeline = config.finish()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Blueprint {
    pub(crate) env: Environment,
    pub(crate) resources: ResourceMap,
    pub(crate) graph: Graph<Task, ()>,
    pub(crate) clean: NodeIndex,
    /// Category index -> name of the task it is bound to.
    bound: HashMap<usize, String>,
}

impl Blueprint {
    /// Creates a new configuration with only the `clean` task.
    pub fn new() -> Self {
        let mut graph = Graph::new();
        let clean = graph.add_node(Task::clean());

        Self {
            env: Environment::default(),
            resources: ResourceMap::default(),
            graph,
            clean,
            bound: HashMap::new(),
        }
    }

    /// Sets the project root every pattern is resolved against.
    pub fn root(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.env.root = dir.into();
        self
    }

    /// Sets the output tree, relative to the root unless absolute.
    pub fn dist(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.env.dist = dir.into();
        self
    }

    /// Sets the cache directory, relative to the root unless absolute.
    pub fn cache(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.env.cache = dir.into();
        self
    }

    /// Starts declaring a resource category.
    pub fn category(&mut self, name: impl Into<String>) -> CategoryDef<'_> {
        CategoryDef {
            blueprint: self,
            name: name.into(),
            entries: Vec::new(),
            watch: Vec::new(),
            base: None,
            destination: Utf8PathBuf::new(),
        }
    }

    /// Starts declaring the task processing `resource`.
    pub fn task(&mut self, name: impl Into<String>, resource: Resource) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            resource,
            delay: Duration::ZERO,
        }
    }

    pub fn finish(self) -> Result<Pipeline, BlueprintError> {
        let Blueprint {
            mut env,
            resources,
            mut graph,
            clean,
            bound,
        } = self;

        for (index, category) in resources.iter().enumerate() {
            if !bound.contains_key(&index) {
                return Err(BlueprintError::Unbound(category.name().to_string()));
            }
        }

        let writers: Vec<_> = graph
            .node_indices()
            .filter(|&index| graph[index].writes())
            .collect();

        for index in writers {
            graph.add_edge(clean, index, ());
        }

        if let Ok(root) = env.root.canonicalize_utf8() {
            env.root = root;
        }

        Ok(Pipeline::new(env, resources, graph, clean))
    }

    fn has_task(&self, name: &str) -> bool {
        self.graph.node_weights().any(|task| task.name == name)
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CategoryDef<'a> {
    blueprint: &'a mut Blueprint,
    name: String,
    entries: Vec<String>,
    watch: Vec<String>,
    base: Option<Utf8PathBuf>,
    destination: Utf8PathBuf,
}

impl<'a> CategoryDef<'a> {
    /// Adds a glob selecting files the task reads.
    pub fn entry(mut self, glob: impl Into<String>) -> Self {
        self.entries.push(glob.into());
        self
    }

    /// Adds a glob whose changes trigger the task. Defaults to the entries.
    pub fn watch(mut self, glob: impl Into<String>) -> Self {
        self.watch.push(glob.into());
        self
    }

    /// Sets the directory relative output paths are computed from, for all
    /// entries. Defaults to the static part of each entry glob.
    pub fn base(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.base = Some(dir.into());
        self
    }

    /// Sets the destination subtree inside the output tree.
    pub fn destination(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.destination = dir.into();
        self
    }

    pub fn register(self) -> Result<Resource, BlueprintError> {
        if self.blueprint.resources.get(&self.name).is_some() {
            return Err(BlueprintError::DuplicateCategory(self.name));
        }

        let entries = self
            .entries
            .into_iter()
            .map(|glob| match &self.base {
                Some(base) => Source::with_base(glob, base.clone()),
                None => Source::new(glob),
            })
            .collect();

        let category = ResourceCategory::new(self.name, entries, self.watch, self.destination)?;

        Ok(Resource(self.blueprint.resources.push(category)))
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: String,
    resource: Resource,
    delay: Duration,
}

impl<'a> TaskDef<'a> {
    /// How long the watcher waits for changes to settle before running the
    /// task. Every new change restarts the wait.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn run<T>(self, transform: T) -> Result<(), BlueprintError>
    where
        T: Transform + 'static,
    {
        let Resource(index) = self.resource;

        if self.blueprint.has_task(&self.name) {
            return Err(BlueprintError::DuplicateTask(self.name));
        }

        let category = self.blueprint.resources.at(index).clone();

        if let Some(task) = self.blueprint.bound.get(&index) {
            return Err(BlueprintError::CategoryTaken {
                category: category.name().to_string(),
                task: task.clone(),
            });
        }

        self.blueprint.bound.insert(index, self.name.clone());
        self.blueprint.graph.add_node(Task {
            name: self.name,
            kind: TaskKind::Transform {
                category,
                transform: Arc::new(transform),
                delay: self.delay,
            },
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Passthrough;

    #[test]
    fn test_clean_precedes_writers() {
        let mut config = Blueprint::new();
        let a = config.category("a").entry("a/*.txt").register().unwrap();
        let b = config.category("b").entry("b/*.txt").register().unwrap();
        config.task("copy-a", a).run(Passthrough).unwrap();
        config.task("copy-b", b).run(Passthrough).unwrap();

        let pipeline = config.finish().unwrap();
        let graph = pipeline.graph();
        let clean = pipeline.clean_index();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        for index in graph.node_indices().filter(|&i| i != clean) {
            assert!(graph.contains_edge(clean, index));
        }
    }

    #[test]
    fn test_category_bound_once() {
        let mut config = Blueprint::new();
        let a = config.category("a").entry("a/*.txt").register().unwrap();
        config.task("first", a).run(Passthrough).unwrap();

        assert!(matches!(
            config.task("second", a).run(Passthrough),
            Err(BlueprintError::CategoryTaken { .. })
        ));
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = Blueprint::new();
        let a = config.category("a").entry("a/*.txt").register().unwrap();

        assert!(matches!(
            config.category("a").entry("x/*.txt").register(),
            Err(BlueprintError::DuplicateCategory(_))
        ));

        assert!(matches!(
            config.task("clean", a).run(Passthrough),
            Err(BlueprintError::DuplicateTask(_))
        ));
    }

    #[test]
    fn test_unbound_category() {
        let mut config = Blueprint::new();
        config.category("orphan").entry("a/*.txt").register().unwrap();

        assert!(matches!(config.finish(), Err(BlueprintError::Unbound(_))));
    }

    #[test]
    fn test_category_without_entries() {
        let mut config = Blueprint::new();

        assert!(matches!(
            config.category("empty").register(),
            Err(BlueprintError::NoEntries(_))
        ));
    }

    #[test]
    fn test_shared_base() {
        let mut config = Blueprint::new();
        let copy = config
            .category("copy")
            .entry("src/json/**/*.json")
            .entry("src/php/**/*.php")
            .base("src")
            .register()
            .unwrap();
        config.task("copy", copy).run(Passthrough).unwrap();

        let pipeline = config.finish().unwrap();
        let category = pipeline.resources().get("copy").unwrap();

        assert!(category.entries().iter().all(|e| e.base == "src"));
        assert_eq!(category.watch(), ["src/json/**/*.json", "src/php/**/*.php"]);
    }
}
