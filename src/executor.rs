//! Generic scheduler for the task graph.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use petgraph::Graph;
use petgraph::graph::NodeIndex;
use rayon::Yield;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Environment, Mode};
use crate::error::{BuildError, TaskError};
use crate::output::Claims;
use crate::task::{Task, TaskOutcome};

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub name: String,
    pub start: Instant,
    pub duration: Duration,
    pub outcome: TaskOutcome,
}

/// Tasks that ran successfully, in order of completion.
#[derive(Debug, Default)]
pub struct Report {
    pub executions: Vec<TaskExecution>,
}

impl Report {
    pub fn get(&self, name: &str) -> Option<&TaskExecution> {
        self.executions.iter().find(|e| e.name == name)
    }

    /// Total number of files that changed on disk.
    pub fn written(&self) -> usize {
        self.executions.iter().map(|e| e.outcome.written).sum()
    }
}

type Message = (NodeIndex, Result<TaskOutcome, TaskError>, Instant, Duration);

/// This function executes a subset of the task graph using the rayon thread
/// pool. Tasks are started as soon as their dependencies inside the subset
/// have completed.
///
/// The algorithm works as follows:
/// 1. Count, for each node to run, its dependencies that are also scheduled.
/// 2. Spawn every node whose count is zero.
/// 3. Wait for results on a channel. When a task completes, decrement the
///    counts of its dependents and spawn those that reach zero.
/// 4. After the first failure nothing new is spawned. Tasks already running
///    are awaited, then the first failure is returned.
///
/// The scheduler loop itself runs on the calling thread, so even a pool with
/// a single worker is free to run the spawned tasks.
pub(crate) fn run_tasks_parallel(
    graph: &Graph<Task, ()>,
    env: &Environment,
    mode: Mode,
    nodes_to_run: &HashSet<NodeIndex>,
) -> Result<Report, BuildError> {
    if let Err(cycle) = petgraph::algo::toposort(graph, None) {
        return Err(BuildError::Cycle(graph[cycle.node_id()].name.clone()));
    }

    // Build a map from a dependency to the nodes that depend on it.
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    // A dependency only counts if it's also in the set of nodes to run.
    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                graph
                    .neighbors_directed(i, petgraph::Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len() as u64;
    if total_tasks == 0 {
        return Ok(Report::default());
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&crate::utils::get_style_root());
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task();
    let claims = Claims::default();

    let (executions, failure) = rayon::in_place_scope(|s| {
        let (result_sender, result_receiver) = channel::<Message>();

        let spawn_task = |index: NodeIndex| {
            let task = &graph[index];
            let sender = result_sender.clone();
            let pb_style = pb_style.clone();
            let claims = &claims;

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = task.name.as_str());
                span.pb_set_style(&pb_style);
                span.pb_set_message(&format!("Running {} ({})", task.name, task.describe()));
                let _enter = span.enter();

                let start = Instant::now();

                // Tasks share nothing but the claim table, which stays
                // consistent even if a transform panics halfway through.
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    task.run(env, mode, claims)
                }))
                .unwrap_or_else(|panic| {
                    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        format!("Task panicked: {s}")
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        format!("Task panicked: {s}")
                    } else {
                        String::from("Task panicked with unknown payload")
                    };

                    Err(TaskError::Transform(anyhow::anyhow!(msg)))
                });

                // The receiver outlives every spawned task.
                let _ = sender.send((index, result, start, start.elapsed()));
            });
        };

        let mut in_flight = 0;
        let mut executions = Vec::new();
        let mut failure: Option<BuildError> = None;

        // Seed initial tasks
        for &index in nodes_to_run {
            if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                spawn_task(index);
                in_flight += 1;
            }
        }

        // Scheduler loop
        while in_flight > 0 {
            let Some((index, result, start, duration)) = next_result(&result_receiver) else {
                break;
            };

            in_flight -= 1;
            root_span.pb_inc(1);

            let name = graph[index].name.clone();

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(source) => {
                    tracing::error!(task = %name, "{source}");
                    if failure.is_none() {
                        failure = Some(BuildError::Task { name, source });
                    }
                    continue;
                }
            };

            tracing::debug!(
                task = %name,
                inputs = outcome.inputs,
                written = outcome.written,
                "finished in {duration:?}"
            );

            executions.push(TaskExecution {
                name,
                start,
                duration,
                outcome,
            });

            if failure.is_some() {
                continue;
            }

            // Unlock dependents
            for &next in dependents.get(&index).into_iter().flatten() {
                if let Some(count) = dependency_counts.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        spawn_task(next);
                        in_flight += 1;
                    }
                }
            }
        }

        (executions, failure)
    });

    match failure {
        Some(error) => Err(error),
        None => Ok(Report { executions }),
    }
}

/// Waits for the next finished task. When called from inside a rayon pool
/// the wait keeps running queued jobs, otherwise the only worker could sit
/// here while the tasks it waits for never start.
fn next_result(rx: &Receiver<Message>) -> Option<Message> {
    loop {
        match rx.try_recv() {
            Ok(message) => return Some(message),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        match rayon::yield_now() {
            None => return rx.recv().ok(),
            Some(Yield::Executed) => {}
            Some(_) => match rx.recv_timeout(Duration::from_millis(5)) {
                Ok(message) => return Some(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use camino::Utf8Path;

    use super::*;
    use crate::output::Output;
    use crate::resource::{Input, ResourceCategory, Source};
    use crate::task::TaskKind;
    use crate::transform::{Context, Transform};

    struct Counting {
        dist_empty_on_start: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Transform for Counting {
        fn describe(&self) -> &'static str {
            "counting"
        }

        fn transform(&self, ctx: &Context<'_>, _: &[Input]) -> anyhow::Result<Vec<Output>> {
            let dist = ctx.env.dist_dir();
            let stale = dist.join("stale.txt");
            if !stale.exists() {
                self.dist_empty_on_start.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail {
                anyhow::bail!("broken on purpose");
            }
            Ok(vec![Output::text(format!("{}.txt", ctx.task), "ok")])
        }
    }

    fn writer(name: &str, counter: &Arc<AtomicUsize>, fail: bool) -> Task {
        let category = ResourceCategory::new(
            name.into(),
            vec![Source::new("src/*.none")],
            vec![],
            "".into(),
        )
        .unwrap();

        Task {
            name: name.into(),
            kind: TaskKind::Transform {
                category: Arc::new(category),
                transform: Arc::new(Counting {
                    dist_empty_on_start: counter.clone(),
                    fail,
                }),
                delay: Duration::ZERO,
            },
        }
    }

    fn setup(fail: bool) -> (tempfile::TempDir, Environment, Graph<Task, ()>, Arc<AtomicUsize>) {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment {
            root: Utf8Path::from_path(dir.path()).unwrap().to_path_buf(),
            ..Default::default()
        };

        fs::create_dir_all(env.dist_dir()).unwrap();
        fs::write(env.dist_dir().join("stale.txt"), "old").unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        let clean = graph.add_node(Task::clean());

        for (i, name) in ["a", "b", "c", "d"].into_iter().enumerate() {
            let index = graph.add_node(writer(name, &counter, fail && i == 1));
            graph.add_edge(clean, index, ());
        }

        (dir, env, graph, counter)
    }

    #[test]
    fn test_clean_runs_before_writers() {
        let (_dir, env, graph, counter) = setup(false);
        let all = graph.node_indices().collect();

        let report = run_tasks_parallel(&graph, &env, Mode::Build, &all).unwrap();

        // every writer saw the output tree already cleaned
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(report.executions.len(), 5);
        assert_eq!(report.executions[0].name, "clean");
        assert_eq!(report.written(), 4);
        assert!(!env.dist_dir().join("stale.txt").exists());
        for name in ["a", "b", "c", "d"] {
            assert!(env.dist_dir().join(format!("{name}.txt")).is_file());
        }
    }

    #[test]
    fn test_single_worker_pool() {
        let (dir, env, graph, counter) = setup(false);
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
            let all = graph.node_indices().collect();
            let result = pool.install(|| run_tasks_parallel(&graph, &env, Mode::Build, &all));
            let _ = tx.send(result.map(|report| report.executions.len()));
            drop(dir);
        });

        let ran = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("scheduler stalled on a single worker");

        assert_eq!(ran.unwrap(), 5);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_failure_fails_the_build() {
        let (_dir, env, graph, _) = setup(true);
        let all = graph.node_indices().collect();

        match run_tasks_parallel(&graph, &env, Mode::Build, &all) {
            Err(BuildError::Task { name, source }) => {
                assert_eq!(name, "b");
                assert!(source.to_string().contains("broken on purpose"));
            }
            other => panic!("expected task failure, got {other:?}"),
        }
    }

    #[test]
    fn test_subset_skips_clean() {
        let (_dir, env, graph, _) = setup(false);
        let subset: HashSet<_> = graph
            .node_indices()
            .filter(|&i| graph[i].name == "c")
            .collect();

        let report = run_tasks_parallel(&graph, &env, Mode::Watch, &subset).unwrap();

        assert_eq!(report.executions.len(), 1);
        assert!(env.dist_dir().join("stale.txt").exists());
        assert!(env.dist_dir().join("c.txt").exists());
    }

    #[test]
    fn test_failure_stops_dependents() {
        let (_dir, env, graph, counter) = setup(false);

        // make clean fail by putting a file where the dist parent should be
        let blocked = Environment {
            dist: "blocker/dist".into(),
            ..env.clone()
        };
        fs::write(env.root.join("blocker"), "").unwrap();

        let all = graph.node_indices().collect();

        match run_tasks_parallel(&graph, &blocked, Mode::Build, &all) {
            Err(BuildError::Task { name, .. }) => assert_eq!(name, "clean"),
            other => panic!("expected clean failure, got {other:?}"),
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_subset() {
        let (_dir, env, graph, _) = setup(false);
        let report = run_tasks_parallel(&graph, &env, Mode::Build, &HashSet::new()).unwrap();
        assert!(report.executions.is_empty());
    }

    #[test]
    fn test_output_collision() {
        let (_dir, env, mut graph, counter) = setup(false);

        // a second task producing "a.txt" under the same destination
        let mut twin = writer("twin", &counter, false);
        if let TaskKind::Transform { transform, .. } = &mut twin.kind {
            struct Twin;
            impl Transform for Twin {
                fn describe(&self) -> &'static str {
                    "twin"
                }
                fn transform(&self, _: &Context<'_>, _: &[Input]) -> anyhow::Result<Vec<Output>> {
                    Ok(vec![Output::text("a.txt", "twin")])
                }
            }
            *transform = Arc::new(Twin);
        }
        let twin = graph.add_node(twin);
        let clean = graph
            .node_indices()
            .find(|&i| graph[i].name == "clean")
            .unwrap();
        graph.add_edge(clean, twin, ());

        let all = graph.node_indices().collect();
        let err = run_tasks_parallel(&graph, &env, Mode::Build, &all).unwrap_err();

        match err {
            BuildError::Task {
                source: TaskError::Collision { path, .. },
                ..
            } => assert_eq!(path, "a.txt"),
            other => panic!("expected collision, got {other:?}"),
        }
    }
}
