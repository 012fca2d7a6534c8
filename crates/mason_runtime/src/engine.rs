//! Invocation engine.
//!
//! A single async control flow walks the graph from the requested targets
//! with an explicit work-list, hands ready jobs to the worker pool and
//! reacts to their completion. It never blocks on a child: jobs waiting for
//! children are parked until the last child reports.

use crate::config::SchedulerConfig;
use crate::context::SchedulerContext;
use crate::load::{LoadProbe, SystemLoad};
use crate::pool::{Outcome, PoolConfig, WorkItem, WorkerPool};
use crate::resolver::ResolverSet;
use crate::staleness::run_job;
use crate::teardown::terminate_subprocesses;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use indexmap::IndexSet;
use mason_core::{BuildError, CoreResult, DeferredError, JobId, Uri};
use mason_log::{ExecutionLog, Phase};
use mason_plan::{Job, JobSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Jobs whose body ran, in completion order
    pub executed: Vec<String>,
    /// Jobs found fresh
    pub fresh: Vec<String>,
    /// Jobs that failed or whose dependencies failed
    pub failed: Vec<String>,
    /// Listings of the jobs a dry run would have run
    pub would_run: Vec<String>,
}

/// Path of jobs being invoked, shared between siblings
#[derive(Debug, Clone, Default)]
struct CallChain(Option<Arc<Link>>);

#[derive(Debug)]
struct Link {
    job: JobId,
    next: CallChain,
}

impl CallChain {
    fn push(&self, job: JobId) -> Self {
        Self(Some(Arc::new(Link {
            job,
            next: self.clone(),
        })))
    }

    fn iter(&self) -> impl Iterator<Item = JobId> + '_ {
        std::iter::successors(self.0.as_deref(), |link| link.next.0.as_deref()).map(|link| link.job)
    }

    fn contains(&self, job: JobId) -> bool {
        self.iter().any(|j| j == job)
    }

    /// Chain from the first occurrence of `job` down to the newest entry
    fn cycle_from(&self, job: JobId) -> Vec<JobId> {
        let mut path: Vec<JobId> = self.iter().collect();
        path.reverse();
        let start = path.iter().position(|j| *j == job).unwrap_or(0);
        path.split_off(start)
    }
}

struct Invocation {
    target: Uri,
    parent: Option<JobId>,
    chain: CallChain,
}

/// A job waiting for its children
#[derive(Default)]
struct Parked {
    unresolved: usize,
    children: Vec<JobId>,
    poisoned: bool,
}

#[derive(Default)]
struct Walk {
    stack: Vec<Invocation>,
    parked: HashMap<JobId, Parked>,
    waiters: HashMap<JobId, Vec<JobId>>,
    in_flight: FuturesUnordered<BoxFuture<'static, (JobId, Outcome)>>,
    report: RunReport,
    fatal: Option<BuildError>,
}

/// Drives declared jobs to completion
pub struct Engine {
    ctx: Arc<SchedulerContext>,
    pool: WorkerPool,
}

impl Engine {
    /// Create an engine reading the host load average
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid
    pub fn new(config: SchedulerConfig, resolvers: ResolverSet, log: ExecutionLog) -> CoreResult<Self> {
        Self::with_load_probe(config, resolvers, log, Arc::new(SystemLoad))
    }

    /// Create an engine with a custom load probe
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid
    pub fn with_load_probe(
        config: SchedulerConfig,
        resolvers: ResolverSet,
        log: ExecutionLog,
        load: Arc<dyn LoadProbe>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let pool = WorkerPool::new(PoolConfig::from(&config), load);
        Ok(Self {
            ctx: Arc::new(SchedulerContext::new(config, resolvers, log)),
            pool,
        })
    }

    #[must_use]
    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.ctx
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.ctx.config
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.ctx.log
    }

    /// Declare a job
    ///
    /// # Errors
    ///
    /// Returns error if the declaration is invalid or a target is taken
    pub fn declare(&self, spec: JobSpec) -> CoreResult<JobId> {
        let job = {
            let mut registry = self.ctx.registry.write();
            let id = registry.declare(spec)?;
            registry.job(id).cloned()
        };
        let job = job.ok_or_else(|| BuildError::Internal {
            message: "declared job vanished".to_string(),
        })?;
        self.ctx.log.record(Phase::Defined, job.snapshot());
        Ok(job.id())
    }

    /// The job declaring `target`
    #[must_use]
    pub fn job(&self, target: &str) -> Option<Arc<Job>> {
        self.ctx.registry.read().job_of_target(target).cloned()
    }

    /// Token that interrupts a running `run` when cancelled
    #[must_use]
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.ctx.cancel_token().clone()
    }

    /// Interrupt a running `run` from outside
    pub fn interrupt(&self) {
        self.ctx.cancel_token().cancel();
    }

    /// Bring one target up to date
    ///
    /// # Errors
    ///
    /// See [`Engine::run`]
    pub async fn invoke(&self, target: &str) -> CoreResult<RunReport> {
        self.run(&[target]).await
    }

    /// Bring every target up to date
    ///
    /// Fail-fast returns the first failure and tears the run down; the
    /// engine accepts no further work afterwards. Keep-going finishes every
    /// independent job and returns `DeferredFailures` if anything failed.
    ///
    /// # Errors
    ///
    /// Returns `JobFailed`, `CircularDependency`, `DeferredFailures` or
    /// `Interrupted`
    pub async fn run<S: AsRef<str>>(&self, targets: &[S]) -> CoreResult<RunReport> {
        if self.ctx.is_aborted() {
            return Err(BuildError::Aborted);
        }
        let mut walk = Walk::default();
        let mut roots: IndexSet<JobId> = IndexSet::new();
        for target in targets.iter().rev() {
            walk.stack.push(Invocation {
                target: Uri::new(target.as_ref()),
                parent: None,
                chain: CallChain::default(),
            });
        }

        let cancel = self.ctx.cancel_token().clone();
        loop {
            while let Some(invocation) = walk.stack.pop() {
                let root = invocation.parent.is_none();
                match self.visit(invocation, &mut walk) {
                    Ok(Some(id)) if root => {
                        roots.insert(id);
                    }
                    Ok(_) => {}
                    Err(error) => {
                        self.ctx.abort();
                        walk.fatal = Some(error);
                    }
                }
                if walk.fatal.is_some() {
                    break;
                }
            }
            if let Some(error) = walk.fatal.take() {
                self.teardown();
                return Err(error);
            }
            if self.all_done(&roots) {
                break;
            }
            if walk.in_flight.is_empty() {
                return Err(BuildError::Internal {
                    message: "graph walk stalled with unfinished targets".to_string(),
                });
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::warn!("interrupted");
                    self.teardown();
                    return Err(BuildError::Interrupted);
                }
                Some((id, outcome)) = walk.in_flight.next() => {
                    self.complete(id, outcome, &mut walk);
                }
            }
        }

        let deferred = self.ctx.take_deferred();
        if !deferred.is_empty() {
            for e in &deferred {
                tracing::error!(targets = ?e.targets, message = %e.message, "deferred failure");
            }
            return Err(BuildError::DeferredFailures { errors: deferred });
        }
        Ok(walk.report)
    }

    fn all_done(&self, roots: &IndexSet<JobId>) -> bool {
        let registry = self.ctx.registry.read();
        roots
            .iter()
            .all(|id| registry.job(*id).is_some_and(|j| j.state().is_done()))
    }

    /// Handle one invocation, returning the job it resolved to
    fn visit(&self, invocation: Invocation, walk: &mut Walk) -> CoreResult<Option<JobId>> {
        let Invocation {
            target,
            parent,
            chain,
        } = invocation;

        if self.ctx.config.is_cut(target.as_str()) {
            tracing::debug!(uri = %target, "cut");
            if let Some(parent) = parent {
                self.resolve_edge(parent, true, walk);
            }
            return Ok(None);
        }

        let job = self.job_or_missing(&target)?;
        let id = job.id();
        if let Some(parent) = parent {
            if let Some(parked) = walk.parked.get_mut(&parent) {
                parked.children.push(id);
            }
        }

        if !job.state().mark_invoked() {
            if chain.contains(id) {
                let mut cycle = chain.cycle_from(id);
                cycle.push(id);
                self.cycle_detected(parent, &cycle, walk);
            } else if job.state().is_done() {
                if let Some(parent) = parent {
                    self.resolve_edge(parent, job.state().succeeded(), walk);
                }
            } else if let Some(parent) = parent {
                match waits_on(walk, id, parent) {
                    Some(mut cycle) => {
                        cycle.insert(0, parent);
                        self.cycle_detected(Some(parent), &cycle, walk);
                    }
                    None => walk.waiters.entry(id).or_default().push(parent),
                }
            }
            return Ok(Some(id));
        }

        tracing::debug!(job = %job, "invoked");
        self.ctx.log.record(Phase::Invoked, job.snapshot());
        if let Some(parent) = parent {
            walk.waiters.entry(id).or_default().push(parent);
        }

        if job.dependencies().is_empty() {
            self.submit(&job, walk);
            return Ok(Some(id));
        }

        walk.parked.insert(
            id,
            Parked {
                unresolved: job.dependencies().len(),
                ..Parked::default()
            },
        );
        let chain = chain.push(id);
        for d in job.dependencies().iter().rev() {
            walk.stack.push(Invocation {
                target: d.clone(),
                parent: Some(id),
                chain: chain.clone(),
            });
        }
        Ok(Some(id))
    }

    fn job_or_missing(&self, target: &Uri) -> CoreResult<Arc<Job>> {
        if let Some(job) = self.ctx.registry.read().job_of_target(target.as_str()) {
            return Ok(Arc::clone(job));
        }
        let job = {
            let mut registry = self.ctx.registry.write();
            let id = registry.declare_missing(target)?;
            registry.job(id).cloned()
        };
        let job = job.ok_or_else(|| BuildError::Internal {
            message: format!("missing-rule job for {} vanished", target),
        })?;
        tracing::debug!(uri = %target, "no rule, expecting an existing resource");
        self.ctx.log.record(Phase::Defined, job.snapshot());
        Ok(job)
    }

    fn cycle_detected(&self, parent: Option<JobId>, cycle: &[JobId], walk: &mut Walk) {
        let names: Vec<String> = {
            let registry = self.ctx.registry.read();
            cycle
                .iter()
                .filter_map(|id| registry.job(*id).map(|j| j.to_string()))
                .collect()
        };
        let error = BuildError::CircularDependency { cycle: names };
        tracing::error!(%error, "cycle");

        let Some(parent) = parent else {
            walk.fatal = Some(error);
            return;
        };
        if self.ctx.config.keep_going {
            if let Some(job) = self.ctx.registry.read().job(parent) {
                self.ctx.push_deferred(DeferredError {
                    targets: job.target_names(),
                    message: error.to_string(),
                });
            }
            self.resolve_edge(parent, false, walk);
        } else {
            self.ctx.abort();
            walk.fatal = Some(error);
        }
    }

    /// A child of `parent` finished
    fn resolve_edge(&self, parent: JobId, succeeded: bool, walk: &mut Walk) {
        let ready = match walk.parked.get_mut(&parent) {
            Some(parked) => {
                parked.unresolved = parked.unresolved.saturating_sub(1);
                parked.poisoned |= !succeeded;
                (parked.unresolved == 0).then_some(parked.poisoned)
            }
            None => None,
        };
        let Some(poisoned) = ready else {
            return;
        };
        walk.parked.remove(&parent);
        let Some(job) = self.ctx.registry.read().job(parent).cloned() else {
            return;
        };
        if poisoned {
            tracing::info!(job = %job, "dependency failed, not running");
            self.finish(&job, false, false, walk);
            walk.report.failed.push(job.to_string());
        } else {
            self.submit(&job, walk);
        }
    }

    fn submit(&self, job: &Arc<Job>, walk: &mut Walk) {
        let id = job.id();
        let (item, rx) = WorkItem::new(job.target_names(), job.priority(), job.serial(), {
            let ctx = Arc::clone(&self.ctx);
            let job = Arc::clone(job);
            move || run_job(&ctx, &job)
        });
        self.ctx.log.record(Phase::Enqueued, job.snapshot());
        if let Err(e) = self.pool.submit(item) {
            self.complete(id, Outcome::failed(e), walk);
            return;
        }
        walk.in_flight.push(
            rx.map(move |outcome| {
                (id, outcome.unwrap_or_else(|_| Outcome::failed(BuildError::Aborted)))
            })
            .boxed(),
        );
    }

    /// A work item reported back
    fn complete(&self, id: JobId, outcome: Outcome, walk: &mut Walk) {
        let Some(job) = self.ctx.registry.read().job(id).cloned() else {
            return;
        };
        let name = job.to_string();
        match &outcome.result {
            Ok(()) if outcome.executed => walk.report.executed.push(name),
            Ok(()) => walk.report.fresh.push(name),
            Err(error) => {
                walk.report.failed.push(name);
                self.record_failure(&job, error, walk);
            }
        }
        if let Some(rendered) = outcome.rendered {
            walk.report.would_run.push(rendered);
        }
        self.finish(&job, outcome.executed, outcome.result.is_ok(), walk);
    }

    fn record_failure(&self, job: &Job, error: &BuildError, walk: &mut Walk) {
        if error.is_teardown() {
            return;
        }
        if self.ctx.config.keep_going {
            self.ctx.push_deferred(DeferredError {
                targets: job.target_names(),
                message: error.to_string(),
            });
        } else if self.ctx.abort() {
            walk.fatal = Some(BuildError::JobFailed {
                targets: job.target_names(),
                error: Box::new(error.clone()),
            });
        }
    }

    fn finish(&self, job: &Job, executed: bool, succeeded: bool, walk: &mut Walk) {
        if !job.state().finish(executed, succeeded) {
            return;
        }
        if executed {
            self.ctx.log.record(Phase::Executed, job.snapshot());
        }
        self.ctx.log.record(Phase::Done, job.snapshot());
        for parent in walk.waiters.remove(&job.id()).unwrap_or_default() {
            self.resolve_edge(parent, succeeded, walk);
        }
    }

    fn teardown(&self) {
        self.ctx.abort();
        self.pool.shutdown();
        if self.ctx.config.terminate_subprocesses {
            terminate_subprocesses();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ctx", &self.ctx)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Path from `from` to `to` along unfinished child edges, if any
fn waits_on(walk: &Walk, from: JobId, to: JobId) -> Option<Vec<JobId>> {
    let mut stack = vec![vec![from]];
    let mut seen = IndexSet::new();
    while let Some(path) = stack.pop() {
        let Some(&last) = path.last() else {
            continue;
        };
        if last == to {
            return Some(path);
        }
        if !seen.insert(last) {
            continue;
        }
        if let Some(parked) = walk.parked.get(&last) {
            for child in &parked.children {
                let mut next = path.clone();
                next.push(*child);
                stack.push(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::FixedLoad;
    use crate::resolver::MemoryResolver;
    use mason_core::Freshness;
    use mason_plan::UriSpec;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            jobs: 4,
            terminate_subprocesses: false,
            ..SchedulerConfig::default()
        }
    }

    fn engine_with(config: SchedulerConfig, memory: &Arc<MemoryResolver>) -> Engine {
        let resolvers = ResolverSet::empty().register_shared("file", memory.clone());
        Engine::with_load_probe(
            config,
            resolvers,
            ExecutionLog::disabled(),
            Arc::new(FixedLoad::new(0.0)),
        )
        .unwrap()
    }

    /// Body that produces every target of the job "now"
    fn produce(memory: &Arc<MemoryResolver>) -> impl Fn(&Job) -> anyhow::Result<()> + Send + Sync + 'static {
        let memory = Arc::clone(memory);
        move |job: &Job| {
            for t in job.targets() {
                memory.set(t.clone(), Freshness::now());
            }
            Ok(())
        }
    }

    fn at(secs: f64) -> Freshness {
        Freshness::from_secs(secs)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let memory = Arc::new(MemoryResolver::new());
        let resolvers = ResolverSet::empty().register_shared("file", memory);
        let config = SchedulerConfig {
            jobs: 0,
            ..config()
        };
        assert!(matches!(
            Engine::new(config, resolvers, ExecutionLog::disabled()),
            Err(BuildError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_job_runs() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("in.bin", at(5.0));
        memory.set("out.bin", at(3.0));
        let engine = engine_with(config(), &memory);
        engine
            .declare(JobSpec::file(["out.bin"], ["in.bin"]).body(produce(&memory)))
            .unwrap();

        let report = engine.run(&["out.bin"]).await.unwrap();
        assert_eq!(report.executed, vec!["out.bin"]);
        // The source resolves through its missing-rule job.
        assert_eq!(report.fresh, vec!["in.bin"]);
        let job = engine.job("out.bin").unwrap();
        assert!(job.state().executed());
        assert!(job.state().succeeded());
    }

    #[tokio::test]
    async fn test_equal_freshness_does_not_run() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("in.bin", at(3.0));
        memory.set("out.bin", at(3.0));
        let engine = engine_with(config(), &memory);
        engine
            .declare(JobSpec::file(["out.bin"], ["in.bin"]).body(produce(&memory)))
            .unwrap();

        let report = engine.run(&["out.bin"]).await.unwrap();
        assert!(report.executed.is_empty());
        assert!(!engine.job("out.bin").unwrap().state().executed());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("in.bin", at(5.0));
        memory.set("out.bin", at(3.0));

        let declare = |engine: &Engine| {
            engine
                .declare(
                    JobSpec::file(["out.bin"], ["in.bin"]).body(|_| Ok(())),
                )
                .unwrap();
        };

        let first = engine_with(config(), &memory);
        declare(&first);
        assert_eq!(first.run(&["out.bin"]).await.unwrap().executed.len(), 1);

        memory.set("in.bin", at(2.0));
        let second = engine_with(config(), &memory);
        declare(&second);
        assert!(second.run(&["out.bin"]).await.unwrap().executed.is_empty());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));

        let declare = |engine: &Engine| {
            engine
                .declare(JobSpec::file(["mid"], ["src"]).body(produce(&memory)))
                .unwrap();
            engine
                .declare(JobSpec::file(["out"], ["mid"]).body(produce(&memory)))
                .unwrap();
            engine.declare(JobSpec::phony("all", ["out"])).unwrap();
        };

        let first = engine_with(config(), &memory);
        declare(&first);
        let report = first.run(&["all"]).await.unwrap();
        assert_eq!(report.executed, vec!["mid", "out", "all"]);

        let second = engine_with(config(), &memory);
        declare(&second);
        let report = second.run(&["all"]).await.unwrap();
        // Only the phony job, which is always out of date.
        assert_eq!(report.executed, vec!["all"]);
        assert!(!second.job("mid").unwrap().state().executed());
        assert!(!second.job("out").unwrap().state().executed());
    }

    #[tokio::test]
    async fn test_shared_dependency_invoked_once() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));
        let engine = engine_with(config(), &memory);
        let runs = Arc::new(AtomicUsize::new(0));

        let counting = {
            let runs = Arc::clone(&runs);
            let produce = produce(&memory);
            move |job: &Job| {
                runs.fetch_add(1, Ordering::SeqCst);
                produce(job)
            }
        };
        engine.declare(JobSpec::file(["base"], ["src"]).body(counting)).unwrap();
        engine.declare(JobSpec::file(["left"], ["base"]).body(produce(&memory))).unwrap();
        engine.declare(JobSpec::file(["right"], ["base"]).body(produce(&memory))).unwrap();
        engine.declare(JobSpec::phony("all", ["left", "right", "base"])).unwrap();

        let report = engine.run(&["all", "base"]).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(report.executed.len(), 4);
    }

    #[tokio::test]
    async fn test_fan_out_runs_in_parallel() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(config(), &memory);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        engine.declare(JobSpec::phony("a", Vec::<&str>::new())).unwrap();
        let mut fan = Vec::new();
        for i in 0..4 {
            let name = format!("b{}", i);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            engine
                .declare(JobSpec::phony(name.as_str(), ["a"]).body(move |_: &Job| {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
            fan.push(name);
        }
        engine.declare(JobSpec::phony("all", fan)).unwrap();

        let report = engine.run(&["all"]).await.unwrap();
        assert_eq!(report.executed.len(), 6);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_walk_error_tears_down() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(
            SchedulerConfig {
                jobs: 1,
                ..config()
            },
            &memory,
        );
        let gate = Arc::new(mason_plan::DoneSignal::new());
        {
            let gate = Arc::clone(&gate);
            engine
                .declare(JobSpec::phony("slow", Vec::<&str>::new()).body(move |_: &Job| {
                    gate.wait_blocking(Some(Duration::from_secs(5)));
                    Ok(())
                }))
                .unwrap();
        }
        engine.declare(JobSpec::phony("queued", Vec::<&str>::new())).unwrap();

        // "slow" occupies the only worker and "queued" waits behind it
        // when the empty target name is rejected.
        let result = engine.run(&["slow", "queued", ""]).await;
        assert!(matches!(result, Err(BuildError::InvalidJob { .. })));
        assert!(engine.context().is_aborted());
        gate.set();
        assert!(!engine.job("queued").unwrap().state().executed());
        assert!(matches!(engine.run(&["queued"]).await, Err(BuildError::Aborted)));
    }

    #[tokio::test]
    async fn test_dependencies_finish_first() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));
        let engine = engine_with(config(), &memory);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for (target, dep) in [("a", "src"), ("b", "a"), ("c", "b")] {
            let order = Arc::clone(&order);
            let produce = produce(&memory);
            engine
                .declare(JobSpec::file([target], [dep]).body(move |job: &Job| {
                    order.lock().push(job.to_string());
                    produce(job)
                }))
                .unwrap();
        }
        engine.run(&["c"]).await.unwrap();
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cycle_fails_fast() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(config(), &memory);
        engine.declare(JobSpec::file(["A"], ["B"]).body(produce(&memory))).unwrap();
        engine.declare(JobSpec::file(["B"], ["A"]).body(produce(&memory))).unwrap();

        match engine.run(&["A"]).await {
            Err(BuildError::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["A", "B", "A"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!engine.job("A").unwrap().state().executed());
        assert!(!engine.job("B").unwrap().state().executed());
    }

    #[tokio::test]
    async fn test_cycle_keep_going() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));
        let config = SchedulerConfig {
            keep_going: true,
            ..config()
        };
        let engine = engine_with(config, &memory);
        engine.declare(JobSpec::file(["A"], ["B"]).body(produce(&memory))).unwrap();
        engine.declare(JobSpec::file(["B"], ["A"]).body(produce(&memory))).unwrap();
        engine.declare(JobSpec::file(["C"], ["src"]).body(produce(&memory))).unwrap();
        engine.declare(JobSpec::phony("all", ["A", "C"])).unwrap();

        match engine.run(&["all"]).await {
            Err(BuildError::DeferredFailures { errors }) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].message.contains("Circular dependency"));
                assert!(errors[0].message.contains('A'));
                assert!(errors[0].message.contains('B'));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(engine.job("C").unwrap().state().executed());
        for t in ["A", "B", "all"] {
            let job = engine.job(t).unwrap();
            assert!(job.state().is_done());
            assert!(!job.state().executed());
            assert!(!job.state().succeeded());
        }
    }

    #[tokio::test]
    async fn test_self_dependency() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(config(), &memory);
        engine.declare(JobSpec::file(["A"], ["A"])).unwrap();
        assert!(matches!(
            engine.run(&["A"]).await,
            Err(BuildError::CircularDependency { .. })
        ));
    }

    fn failing_graph(engine: &Engine, memory: &Arc<MemoryResolver>, b_runs: &Arc<AtomicUsize>) {
        engine
            .declare(JobSpec::file(["A"], ["src"]).body(|_| anyhow::bail!("A is broken")))
            .unwrap();
        let b_runs = Arc::clone(b_runs);
        engine
            .declare(JobSpec::file(["B"], ["A"]).body(move |_| {
                b_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        engine
            .declare(JobSpec::file(["C"], ["src"]).body(produce(memory)))
            .unwrap();
    }

    #[tokio::test]
    async fn test_keep_going() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));
        let config = SchedulerConfig {
            keep_going: true,
            ..config()
        };
        let engine = engine_with(config, &memory);
        let b_runs = Arc::new(AtomicUsize::new(0));
        failing_graph(&engine, &memory, &b_runs);

        match engine.run(&["B", "C"]).await {
            Err(BuildError::DeferredFailures { errors }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].targets, vec!["A"]);
                assert!(errors[0].message.contains("A is broken"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(b_runs.load(Ordering::SeqCst), 0);
        let b = engine.job("B").unwrap();
        assert!(b.state().is_done());
        assert!(!b.state().succeeded());
        assert!(engine.job("C").unwrap().state().executed());
        assert!(memory.contains("C"));
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));
        let engine = engine_with(config(), &memory);
        let b_runs = Arc::new(AtomicUsize::new(0));
        failing_graph(&engine, &memory, &b_runs);

        match engine.run(&["B", "C"]).await {
            Err(BuildError::JobFailed { targets, error }) => {
                assert_eq!(targets, vec!["A"]);
                assert!(error.to_string().contains("A is broken"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(b_runs.load(Ordering::SeqCst), 0);
        assert!(engine.context().is_aborted());
        assert!(matches!(engine.run(&["C"]).await, Err(BuildError::Aborted)));
    }

    #[tokio::test]
    async fn test_missing_rule_reported_when_reached() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(config(), &memory);
        engine
            .declare(JobSpec::file(["out.bin"], ["in.bin"]).body(produce(&memory)))
            .unwrap();

        match engine.run(&["out.bin"]).await {
            Err(BuildError::JobFailed { targets, error }) => {
                assert_eq!(targets, vec!["in.bin"]);
                assert_eq!(
                    *error,
                    BuildError::MissingRule {
                        target: "in.bin".to_string()
                    }
                );
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!engine.job("out.bin").unwrap().state().executed());
    }

    #[tokio::test]
    async fn test_unknown_top_level_target() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(config(), &memory);
        assert!(matches!(
            engine.run(&["nothing"]).await,
            Err(BuildError::JobFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_cut_target_is_satisfied() {
        let memory = Arc::new(MemoryResolver::new());
        let config = SchedulerConfig {
            cut: ["expensive".to_string()].into_iter().collect(),
            ..config()
        };
        let engine = engine_with(config, &memory);
        engine
            .declare(JobSpec::file(["expensive"], ["x"]).body(|_| anyhow::bail!("must not run")))
            .unwrap();
        engine.declare(JobSpec::phony("all", ["expensive"])).unwrap();

        let report = engine.run(&["all"]).await.unwrap();
        assert_eq!(report.executed, vec!["all"]);
        assert!(!engine.job("expensive").unwrap().state().invoked());
    }

    #[tokio::test]
    async fn test_serial_jobs_never_overlap() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(
            SchedulerConfig {
                jobs: 8,
                serial_jobs: 1,
                ..config()
            },
            &memory,
        );
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut names = Vec::new();
        for i in 0..6 {
            let name = format!("serial{}", i);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            let body = move |_: &Job| {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            };
            engine
                .declare(JobSpec::file([name.as_str()], Vec::<&str>::new()).serial(true).body(body))
                .unwrap();
            names.push(name);
        }

        let report = engine.run(&names).await.unwrap();
        assert_eq!(report.executed.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_running() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(5.0));
        memory.set("mid", at(3.0));
        memory.set("out", at(4.0));
        let config = SchedulerConfig {
            dry_run: true,
            ..config()
        };
        let engine = engine_with(config, &memory);
        engine
            .declare(JobSpec::file(["mid"], ["src"]).body(|_| anyhow::bail!("must not run")))
            .unwrap();
        engine
            .declare(JobSpec::file(["out"], ["mid"]).body(|_| anyhow::bail!("must not run")))
            .unwrap();

        let report = engine.run(&["out"]).await.unwrap();
        // `out` is newer than `mid` but `mid` would be rebuilt.
        assert_eq!(report.would_run, vec!["mid\n\tsrc\n", "out\n\tmid\n"]);
        assert_eq!(memory.get("mid"), Some(at(3.0)));
    }

    #[tokio::test]
    async fn test_priority_orders_ready_jobs() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(
            SchedulerConfig {
                jobs: 1,
                ..config()
            },
            &memory,
        );
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let gate = Arc::new(mason_plan::DoneSignal::new());

        {
            let gate = Arc::clone(&gate);
            engine
                .declare(JobSpec::phony("first", Vec::<&str>::new()).priority(100).body(move |_| {
                    gate.wait_blocking(Some(Duration::from_secs(5)));
                    Ok(())
                }))
                .unwrap();
        }
        for (name, priority) in [("low", -1), ("high", 10), ("mid", 0)] {
            let order = Arc::clone(&order);
            engine
                .declare(JobSpec::phony(name, Vec::<&str>::new()).priority(priority).body(move |job: &Job| {
                    order.lock().push(job.to_string());
                    Ok(())
                }))
                .unwrap();
        }

        let release = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                gate.set();
            })
        };
        engine.run(&["first", "low", "high", "mid"]).await.unwrap();
        release.join().unwrap();
        assert_eq!(*order.lock(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_interrupt() {
        let memory = Arc::new(MemoryResolver::new());
        let engine = engine_with(config(), &memory);
        let gate = Arc::new(mason_plan::DoneSignal::new());
        {
            let gate = Arc::clone(&gate);
            engine
                .declare(JobSpec::phony("slow", Vec::<&str>::new()).body(move |_| {
                    gate.wait_blocking(Some(Duration::from_secs(5)));
                    Ok(())
                }))
                .unwrap();
        }
        let handle = engine.interrupt_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        assert_eq!(engine.run(&["slow"]).await, Err(BuildError::Interrupted));
        gate.set();
    }

    #[tokio::test]
    async fn test_execution_log_phases() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));
        let meta = mason_log::RunMeta::new(mason_core::RunId::new(), vec![]);
        let log = ExecutionLog::to_dir(dir.path(), &meta).unwrap();
        let resolvers = ResolverSet::empty().register_shared("file", memory.clone());
        let engine = Engine::with_load_probe(config(), resolvers, log, Arc::new(FixedLoad::new(0.0))).unwrap();
        engine
            .declare(JobSpec::file(["out"], ["src"]).body(produce(&memory)))
            .unwrap();

        engine.run(&["out"]).await.unwrap();
        engine.log().close().unwrap();

        let records = mason_log::read_log(dir.path().join(mason_log::EVENTS_FILE)).unwrap();
        let phases: Vec<Phase> = records
            .iter()
            .filter(|r| r.job.targets == vec!["out".to_string()])
            .map(|r| r.phase)
            .collect();
        assert_eq!(phases, Phase::ALL.to_vec());
        let done = records.iter().rev().find(|r| r.phase == Phase::Done).unwrap();
        assert_eq!(done.job.succeeded, Some(true));
    }

    #[tokio::test]
    async fn test_keys_and_credentials_survive() {
        let memory = Arc::new(MemoryResolver::new());
        memory.set("src", at(1.0));
        let engine = engine_with(config(), &memory);
        engine
            .declare(
                JobSpec::file(["out"], [UriSpec::from("src").credential("token")])
                    .key("fetch")
                    .body(produce(&memory)),
            )
            .unwrap();
        engine.run(&["out"]).await.unwrap();
        let registry = engine.context().registry.read();
        assert_eq!(registry.jobs_of_key("fetch").len(), 1);
        assert_eq!(
            registry.meta(&Uri::from("src")).unwrap().credential.as_deref(),
            Some("token")
        );
    }

    #[test]
    fn test_call_chain() {
        let root = CallChain::default();
        let a = root.push(JobId::from_index(0));
        let b = a.push(JobId::from_index(1));
        let c = b.push(JobId::from_index(2));
        assert!(c.contains(JobId::from_index(0)));
        assert!(!a.contains(JobId::from_index(2)));
        assert_eq!(
            c.cycle_from(JobId::from_index(1)),
            vec![JobId::from_index(1), JobId::from_index(2)]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        // Random DAG: job i may only depend on jobs with a smaller index.
        #[test]
        fn prop_every_job_runs_once(edges in proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..4), 1..10)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let memory = Arc::new(MemoryResolver::new());
            let engine = engine_with(config(), &memory);
            let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..edges.len()).map(|_| AtomicUsize::new(0)).collect());

            for (i, deps) in edges.iter().enumerate() {
                let deps: Vec<String> = if i == 0 {
                    Vec::new()
                } else {
                    deps.iter().map(|d| format!("j{}", d.index(i))).collect()
                };
                let runs = Arc::clone(&runs);
                let produce = produce(&memory);
                engine
                    .declare(JobSpec::file([format!("j{}", i)], deps).body(move |job: &Job| {
                        runs[i].fetch_add(1, Ordering::SeqCst);
                        produce(job)
                    }))
                    .unwrap();
            }

            let targets: Vec<String> = (0..edges.len()).map(|i| format!("j{}", i)).collect();
            runtime.block_on(engine.run(&targets)).unwrap();
            for count in runs.iter() {
                prop_assert_eq!(count.load(Ordering::SeqCst), 1);
            }
        }
    }
}
