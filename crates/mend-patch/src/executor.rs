//! Plan execution.
//!
//! One pass over the plan's operations, in order. Each operation resolves
//! its target, gets its pristine content backed up on first touch, and is
//! dispatched to the registered transform. Transform refusals become skips
//! with stable reasons; only I/O failures become errors.

use std::fs;
use std::path::{Path, PathBuf};

use mend_plan::{
    resolve_in_root, ApplyReport, Clock, Operation, OperationKind, PatchPlan, SkipReason,
    SystemClock,
};
use mend_transform::{TransformContext, TransformError, TransformRegistry};
use tracing::{debug, info};

use crate::backup::{BackupRun, BackupStore};

const DEFAULT_STUB_CONTENT: &str = "\"\"\"Auto-created stub module.\"\"\"\n";

/// Knobs for one apply call.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Evaluate and report without writing anything.
    pub dry_run: bool,
    /// Capture pristine copies before the first write to each file.
    pub backup: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup: true,
        }
    }
}

/// Applies a [`PatchPlan`] to the project tree it is rooted at.
#[derive(Debug)]
pub struct PatchExecutor {
    registry: TransformRegistry,
    ctx: TransformContext,
}

impl PatchExecutor {
    /// Executor with the default transform registry and context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: TransformRegistry::with_defaults(),
            ctx: TransformContext::new(),
        }
    }

    /// Replaces the transform registry.
    #[must_use]
    pub fn with_registry(mut self, registry: TransformRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the transform context.
    #[must_use]
    pub fn with_context(mut self, ctx: TransformContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Runs the plan with the wall clock stamping any backup run.
    #[must_use]
    pub fn apply(&self, plan: &PatchPlan, options: ExecutorOptions) -> ApplyReport {
        self.apply_with_clock(plan, options, &SystemClock)
    }

    /// Runs the plan. Per-operation problems land in the report; this call
    /// itself never fails.
    #[must_use]
    pub fn apply_with_clock(
        &self,
        plan: &PatchPlan,
        options: ExecutorOptions,
        clock: &dyn Clock,
    ) -> ApplyReport {
        let mut report = ApplyReport::new(options.dry_run);
        let store = BackupStore::new(plan.root());
        let mut run: Option<BackupRun> = None;

        for op in plan.operations() {
            self.apply_one(plan.root(), op, options, &store, &mut run, clock, &mut report);
        }

        if let Some(run) = &run {
            if !run.is_empty() {
                if let Err(err) = run.finish() {
                    report.record_error(run.dir().display().to_string(), err.to_string());
                }
                report.backup_dir = Some(run.dir().to_path_buf());
                report.run_id = Some(run.run_id().to_owned());
            }
        }
        info!(
            modified = report.modified.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            dry_run = options.dry_run,
            "plan applied"
        );
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_one(
        &self,
        root: &Path,
        op: &Operation,
        options: ExecutorOptions,
        store: &BackupStore,
        run: &mut Option<BackupRun>,
        clock: &dyn Clock,
        report: &mut ApplyReport,
    ) {
        let target = op.target_file();
        let path = match resolve_in_root(root, target) {
            Ok(path) => path,
            Err(err) => {
                report.record_error(target.display().to_string(), err.to_string());
                return;
            }
        };

        // Stub creation writes a file that must not exist yet; everything
        // else rewrites one that must.
        if op.kind() == OperationKind::CreateModuleStub {
            create_stub(&path, op, options, report);
            return;
        }
        if !path.exists() {
            report.record_skip(target, &SkipReason::TargetNotFound);
            return;
        }
        if !path.is_file() {
            report.record_skip(target, &SkipReason::NotAFile);
            return;
        }
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => {
                report.record_error(target.display().to_string(), format!("read failed: {err}"));
                return;
            }
        };

        let outcome = match self.registry.run(&source, op, &self.ctx) {
            Ok(outcome) => outcome,
            Err(TransformError::AlreadyApplied) => {
                report.record_skip(target, &SkipReason::AlreadyApplied);
                return;
            }
            Err(err) if err.is_skip() => {
                debug!(file = %target.display(), reason = %err, "transform refused");
                report.record_skip(target, &SkipReason::TransformFailed(err.to_string()));
                return;
            }
            Err(err) => {
                report.record_error(target.display().to_string(), err.to_string());
                return;
            }
        };

        let changed = outcome.changes_target(&source);
        let (new_source, companions) = outcome.into_parts();
        if !changed && companions.is_empty() {
            report.record_skip(target, &SkipReason::AlreadyApplied);
            return;
        }

        // All companion outputs are checked before any write so a refusal
        // leaves the whole operation untouched.
        let rel_parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut companion_paths: Vec<PathBuf> = Vec::new();
        for companion in &companions {
            let companion_path = path
                .parent()
                .map_or_else(|| root.to_path_buf(), Path::to_path_buf)
                .join(&companion.rel_path);
            if companion_path.exists() {
                report.record_skip(
                    target,
                    &SkipReason::WouldOverwrite(rel_parent.join(&companion.rel_path)),
                );
                return;
            }
            companion_paths.push(companion_path);
        }

        if options.dry_run {
            if changed {
                report.record_modified(target);
            }
            for companion in &companions {
                report.record_modified(rel_parent.join(&companion.rel_path));
            }
            return;
        }

        if changed {
            if options.backup {
                let run = run.get_or_insert_with(|| store.begin_run(clock));
                if let Err(err) = run.capture(target) {
                    report.record_error(
                        target.display().to_string(),
                        format!("backup failed: {err}"),
                    );
                    return;
                }
            }
            if let Err(err) = fs::write(&path, new_source.as_bytes()) {
                report.record_error(target.display().to_string(), format!("write failed: {err}"));
                return;
            }
            report.record_modified(target);
        }
        for (companion, companion_path) in companions.iter().zip(&companion_paths) {
            if let Some(parent) = companion_path.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    report.record_error(
                        companion_path.display().to_string(),
                        format!("write failed: {err}"),
                    );
                    continue;
                }
            }
            match fs::write(companion_path, companion.content.as_bytes()) {
                Ok(()) => report.record_modified(rel_parent.join(&companion.rel_path)),
                Err(err) => report.record_error(
                    companion_path.display().to_string(),
                    format!("write failed: {err}"),
                ),
            }
        }
        debug!(file = %target.display(), kind = op.kind().as_str(), "applied");
    }
}

impl Default for PatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn create_stub(path: &Path, op: &Operation, options: ExecutorOptions, report: &mut ApplyReport) {
    let target = op.target_file();
    if path.exists() {
        report.record_skip(target, &SkipReason::WouldOverwrite(target.to_path_buf()));
        return;
    }
    if options.dry_run {
        report.record_modified(target);
        return;
    }
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            report.record_error(target.display().to_string(), format!("write failed: {err}"));
            return;
        }
    }
    let content = op.content().unwrap_or(DEFAULT_STUB_CONTENT);
    match fs::write(path, content.as_bytes()) {
        Ok(()) => report.record_modified(target),
        Err(err) => {
            report.record_error(target.display().to_string(), format!("write failed: {err}"));
        }
    }
}
