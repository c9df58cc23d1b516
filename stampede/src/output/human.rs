use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_ms_opt, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &std::path::Path, plan: &stampede_core::Plan) {
        println!("plan: {} ({})", plan.name, plan_path.display());
        println!(
            "stages: {} start_vus={} max_vus={} duration={} iterations={}",
            plan.stages.len(),
            plan.start_vus,
            plan.max_vus(),
            format_duration(plan.total_duration()),
            plan.iterations
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );
        println!(
            "steps: {} thresholds: {}",
            plan.script.steps.len(),
            plan.thresholds.len()
        );
        println!();
        self.progress.set_prefix(plan.name.clone());
    }

    fn progress(&self) -> Option<stampede_core::ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u: stampede_core::ProgressUpdate| {
            let m = &u.metrics;
            let stage = u.stage.as_ref().map_or_else(String::new, |s| {
                format!(
                    " stage={}/{} stage_remaining={}",
                    s.index + 1,
                    s.count,
                    format_duration(s.stage_remaining)
                )
            });

            let message = format!(
                "vus={}/{}{stage} elapsed={} rps={} reqs={} failed={} checks_failed={}/{} iters={} p95={}",
                u.active_vus,
                u.target_vus,
                format_duration(u.elapsed),
                format_rate(m.rps_now),
                m.requests_total,
                m.failed_requests_total,
                m.checks_failed_total,
                m.checks_total,
                m.iterations_total,
                format_ms_opt(m.latency_p95_ms),
            );

            progress.update(u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, result: &stampede_core::RunResult) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(result));
        Ok(())
    }
}
