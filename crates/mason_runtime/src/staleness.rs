//! Staleness decisions and job execution on worker threads.

use crate::config::DryRunPropagation;
use crate::context::SchedulerContext;
use crate::pool::{Outcome, panic_message};
use mason_core::{BuildError, Freshness, ResolverError, Uri, UriMeta};
use mason_plan::{Job, JobKind};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// What the worker does with a job
pub trait Buildable {
    /// Whether the body must run
    ///
    /// # Errors
    ///
    /// Returns error if a dependency's freshness cannot be resolved
    fn needs_update(&self, ctx: &SchedulerContext) -> Result<bool, BuildError>;

    /// Run the body, or render the job in a dry run
    ///
    /// # Errors
    ///
    /// Returns the body's error
    fn execute(&self, ctx: &SchedulerContext) -> Result<Option<String>, BuildError>;

    /// Remove targets not marked `keep`; failures are only logged
    fn remove_targets(&self, ctx: &SchedulerContext);
}

impl Buildable for Job {
    fn needs_update(&self, ctx: &SchedulerContext) -> Result<bool, BuildError> {
        let use_content_hash = match self.kind() {
            JobKind::Phony => return Ok(true),
            JobKind::File {
                use_content_hash, ..
            } => use_content_hash.unwrap_or(ctx.config.use_content_hash),
        };
        if ctx.config.dry_run
            && ctx.config.dry_run_propagation == DryRunPropagation::Upstream
            && upstream_executed(self, ctx)
        {
            return Ok(true);
        }
        file_needs_update(self, ctx, use_content_hash)
    }

    fn execute(&self, ctx: &SchedulerContext) -> Result<Option<String>, BuildError> {
        if ctx.config.dry_run {
            return Ok(Some(self.render()));
        }
        tracing::info!(job = %self, "executing");
        match catch_unwind(AssertUnwindSafe(|| self.call_body())) {
            Ok(Ok(())) => Ok(None),
            Ok(Err(e)) => Err(match e.downcast::<BuildError>() {
                Ok(e) => e,
                Err(e) => BuildError::JobExecution {
                    targets: self.target_names(),
                    message: format!("{:#}", e),
                },
            }),
            Err(panic) => Err(BuildError::JobExecution {
                targets: self.target_names(),
                message: format!("panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }

    fn remove_targets(&self, ctx: &SchedulerContext) {
        if self.kind().is_phony() || ctx.config.dry_run {
            return;
        }
        tracing::info!(job = %self, "removing targets");
        for t in self.targets() {
            let meta = ctx.meta_of(t);
            if meta.keep {
                continue;
            }
            if let Err(e) = ctx.resolvers.remove(t, meta.credential.as_deref()) {
                tracing::info!(uri = %t, error = %e, "failed to remove target");
            }
        }
    }
}

fn upstream_executed(job: &Job, ctx: &SchedulerContext) -> bool {
    let registry = ctx.registry.read();
    job.dependencies().iter().any(|d| {
        registry
            .job_of_target(d.as_str())
            .is_some_and(|j| j.state().executed())
    })
}

fn file_needs_update(
    job: &Job,
    ctx: &SchedulerContext,
    use_content_hash: bool,
) -> Result<bool, BuildError> {
    let metas: Vec<(&Uri, UriMeta)> = {
        let registry = ctx.registry.read();
        job.dependencies()
            .iter()
            .chain(job.targets())
            .map(|uri| (uri, registry.meta(uri).cloned().unwrap_or_default()))
            .collect()
    };
    let (deps, targets) = metas.split_at(job.dependencies().len());

    // Every dependency is resolved, so siblings sharing it hit the cache.
    let mut newest_dependency = Freshness::OLDEST;
    for (uri, meta) in deps {
        let freshness = ctx.cache.get_or_try_insert(uri, || {
            ctx.resolvers
                .freshness(uri, meta.credential.as_deref(), use_content_hash)
        })?;
        if !meta.check_existence_only {
            newest_dependency = newest_dependency.max(freshness);
        }
    }

    let mut oldest_target: Option<Freshness> = None;
    for (uri, meta) in targets {
        match ctx.resolvers.freshness(uri, meta.credential.as_deref(), false) {
            Ok(freshness) => {
                oldest_target = Some(oldest_target.map_or(freshness, |t| t.min(freshness)));
            }
            Err(e @ (ResolverError::UnsupportedScheme { .. } | ResolverError::InvalidUri { .. })) => {
                return Err(e.into());
            }
            Err(e) => {
                tracing::debug!(uri = %uri, error = %e, "target unavailable, stale");
                return Ok(true);
            }
        }
    }

    // Strict: a dependency as old as the target does not force a rebuild.
    Ok(oldest_target.is_none_or(|t| newest_dependency > t))
}

/// Everything a worker does for one job
///
/// Never panics; failures come back in the outcome after the job's targets
/// were removed.
pub fn run_job(ctx: &SchedulerContext, job: &Job) -> Outcome {
    if ctx.is_aborted() {
        return Outcome::failed(BuildError::Aborted);
    }
    let stale = match job.needs_update(ctx) {
        Ok(stale) => stale,
        Err(e) => {
            tracing::error!(job = %job, error = %e, "staleness check failed");
            job.remove_targets(ctx);
            return Outcome::failed(e);
        }
    };
    if !stale {
        tracing::debug!(job = %job, "fresh");
        return Outcome::fresh();
    }
    match job.execute(ctx) {
        Ok(rendered) => Outcome::ran(rendered),
        Err(e) => {
            tracing::error!(job = %job, error = %e, "job failed");
            job.remove_targets(ctx);
            Outcome::failed(e)
        }
    }
}
