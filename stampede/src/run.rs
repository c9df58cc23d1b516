use std::path::Path;
use std::sync::Arc;

use stampede_core::{AbortReason, HyperTransport, Plan, RunOptions, StopSignal};

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan_yaml::{self, Overrides};
use crate::run_error::RunError;
use crate::run_support::{merged_env, print_threshold_violations};

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let env = merged_env(&args.env).map_err(RunError::InvalidInput)?;
    let plan = load(
        &args.plan,
        Overrides {
            vus: args.vus,
            duration: args.duration,
            iterations: args.iterations,
        },
    )
    .await?;
    stampede_core::validate(&plan)?;

    out.print_header(&args.plan, &plan);

    let stop = Arc::new(StopSignal::new());
    let ctrl_c = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping virtual users");
                stop.stop(AbortReason::External("interrupted".to_string()));
            }
        })
    };

    let result = stampede_core::run(
        plan,
        HyperTransport::new(None),
        RunOptions {
            env,
            progress: out.progress(),
            stop,
        },
    )
    .await;
    ctrl_c.abort();
    let result = result?;

    out.print_summary(&result).map_err(RunError::RuntimeError)?;
    print_threshold_violations(&result);

    Ok(ExitCode::from_result(&result))
}

pub async fn validate(args: ValidateArgs) -> Result<ExitCode, RunError> {
    let plan = load(&args.plan, Overrides::default()).await?;
    stampede_core::validate(&plan)?;

    println!(
        "plan `{}` is valid: {} step(s), {} threshold rule(s), up to {} vus over {}",
        plan.name,
        plan.script.steps.len(),
        plan.thresholds.iter().map(|t| t.conditions.len()).sum::<usize>(),
        plan.max_vus(),
        humantime::format_duration(plan.total_duration()),
    );
    Ok(ExitCode::Success)
}

async fn load(path: &Path, overrides: Overrides) -> Result<Plan, RunError> {
    plan_yaml::load_plan(path, overrides)
        .await
        .map_err(RunError::InvalidInput)
}
