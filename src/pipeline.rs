use std::collections::HashSet;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use camino::Utf8PathBuf;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::{Environment, Mode};
use crate::error::{BuildError, KamadoError};
use crate::executor::{Report, run_tasks_parallel};
use crate::resource::ResourceMap;
use crate::server::DevServer;
use crate::task::Task;
use crate::utils::as_overhead;
use crate::watch::{WatchBinding, debounce};

/// A validated task graph, ready to run.
///
/// Created with [`Blueprint::finish`](crate::Blueprint::finish).
pub struct Pipeline {
    env: Environment,
    resources: ResourceMap,
    graph: Graph<Task, ()>,
    clean: NodeIndex,
}

impl Pipeline {
    pub(crate) fn new(
        env: Environment,
        resources: ResourceMap,
        graph: Graph<Task, ()>,
        clean: NodeIndex,
    ) -> Self {
        Self {
            env,
            resources,
            graph,
            clean,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    #[cfg(test)]
    pub(crate) fn graph(&self) -> &Graph<Task, ()> {
        &self.graph
    }

    #[cfg(test)]
    pub(crate) fn clean_index(&self) -> NodeIndex {
        self.clean
    }

    /// Names of every task in registration order, `clean` first.
    pub fn task_names(&self) -> Vec<&str> {
        self.graph.node_weights().map(|task| task.name.as_str()).collect()
    }

    /// One binding per task that reads a category.
    pub fn bindings(&self) -> Vec<WatchBinding<'_>> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let task = &self.graph[index];
                task.category().map(|category| WatchBinding {
                    task: &task.name,
                    category,
                    delay: task.delay(),
                    tasks: HashSet::from([index]),
                })
            })
            .collect()
    }

    /// Erases the output tree.
    pub fn clean(&self) -> Result<Report, BuildError> {
        self.execute(Mode::Build, &HashSet::from([self.clean]))
    }

    /// Cleans the output tree and runs every task.
    pub fn build(&self) -> Result<Report, BuildError> {
        tracing::info!("building {}", self.env.root);

        let all = self.graph.node_indices().collect();
        self.execute(Mode::Build, &all)
    }

    /// Runs a single task by name, without cleaning first.
    pub fn run(&self, name: &str) -> Result<Report, BuildError> {
        let Some(index) = self
            .graph
            .node_indices()
            .find(|&index| self.graph[index].name == name)
        else {
            return Err(BuildError::UnknownTask {
                name: name.to_string(),
                available: self.task_names().join(", "),
            });
        };

        self.execute(Mode::Build, &HashSet::from([index]))
    }

    fn execute(&self, mode: Mode, nodes: &HashSet<NodeIndex>) -> Result<Report, BuildError> {
        let s = Instant::now();
        let report = run_tasks_parallel(&self.graph, &self.env, mode, nodes)?;

        tracing::info!(
            "ran {} task(s), {} file(s) written {}",
            report.executions.len(),
            report.written(),
            as_overhead(s)
        );

        Ok(report)
    }

    /// Builds everything, then serves the output tree and rebuilds on change.
    /// A failed build returns before the server is started.
    #[cfg(feature = "live")]
    pub fn start(&self, server: &mut dyn DevServer) -> Result<(), KamadoError> {
        self.build()?;
        self.serve(server)
    }

    /// Serves the output tree and reruns the tasks whose watched files change,
    /// reloading the browser after each successful run. Never cleans.
    #[cfg(feature = "live")]
    pub fn serve(&self, server: &mut dyn DevServer) -> Result<(), KamadoError> {
        self.serve_with(server, |roots, tx| {
            crate::watch::notify_source(&self.env.root, roots, tx)
        })
    }

    /// Starts the server, then the change source built by `source` from the
    /// watch roots, then handles its events until it hangs up.
    #[cfg(any(feature = "live", test))]
    fn serve_with<S, F>(&self, server: &mut dyn DevServer, source: F) -> Result<(), KamadoError>
    where
        F: FnOnce(
            &[Utf8PathBuf],
            std::sync::mpsc::Sender<Vec<Utf8PathBuf>>,
        ) -> Result<S, crate::error::WatchError>,
    {
        server.init(&self.env.dist_dir())?;

        let (tx, rx) = std::sync::mpsc::channel();

        let roots = crate::watch::watch_roots(&self.env.root, &self.bindings());
        let _source = source(&roots, tx)?;

        self.serve_events(server, rx)
    }

    /// Like [`Pipeline::serve`], with change batches coming from `rx` instead
    /// of the filesystem. Paths are relative to the project root.
    /// The server is started unless already running. Returns once the sender
    /// hangs up and pending runs are done.
    pub fn serve_events(
        &self,
        server: &mut dyn DevServer,
        rx: Receiver<Vec<Utf8PathBuf>>,
    ) -> Result<(), KamadoError> {
        server.init(&self.env.dist_dir())?;

        let bindings = self.bindings();
        tracing::info!("watching {} task(s) for changes...", bindings.len());

        let server_ref = &*server;
        debounce(&bindings, &rx, |binding| {
            tracing::info!(task = binding.task, "change detected, re-running...");

            match self.execute(Mode::Watch, &binding.tasks) {
                Ok(_) => server_ref.reload(),
                Err(e) => tracing::error!("{e}"),
            }
        });

        server.teardown();
        Ok(())
    }
}
