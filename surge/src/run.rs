use anyhow::Context as _;
use std::path::Path;
use std::str::FromStr as _;
use std::sync::Arc;

use surge_core::{Registry, Report, RunOptions, Scenario, TestPlan, TestRun};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::shop::{BuiltinWorkload, ShopMetrics, ShopWorkload};

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let mut plan = TestPlan::from_path(&args.plan)?;
    if let Some(duration) = args.duration {
        plan.override_duration(duration);
    }

    let registry = Arc::new(Registry::new());
    let mut test = TestRun::new(registry.clone())?;
    let metrics = ShopMetrics::register(&registry)?;

    for (name, config) in &plan.scenarios {
        let kind = resolve_exec(name, config.exec.as_deref())?;
        let workload = ShopWorkload::new(kind, &args.base_url, metrics.clone(), args.think_time);
        test.scenario(Scenario::from_config(
            name.clone(),
            config.clone(),
            Arc::new(workload),
        ))?;
    }
    for threshold in plan.thresholds()? {
        test.threshold(threshold)?;
    }

    let mut options = RunOptions {
        error_ceiling: plan.error_ceiling,
        progress: out.progress(),
        ..RunOptions::default()
    };
    if let Some(grace) = args.abort_grace {
        options.abort_grace = grace;
    }
    test.options(options);

    let control = test.control();
    let ctrl_c = {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; stopping scenarios");
                control.abort_with("interrupted");
            }
        })
    };
    let deadline = args.abort_after.map(|after| {
        let control = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            control.abort_with(format!(
                "--abort-after {} elapsed",
                humantime::format_duration(after)
            ));
        })
    });

    out.print_header(&args.plan, &plan);
    let result = test.run().await;

    ctrl_c.abort();
    if let Some(deadline) = deadline {
        deadline.abort();
    }
    let result = result?;

    let report = Report::render(&result)?;
    out.print_summary(&result, &report)
        .map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_json {
        write_summary(path, &report.json)
            .await
            .map_err(RunError::RuntimeError)?;
    }
    if let Some(path) = &args.summary_text {
        write_summary(path, &report.text)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    Ok(ExitCode::from_verdict(result.passed, result.aborted))
}

pub fn list_workloads() {
    use strum::IntoEnumIterator as _;

    for w in BuiltinWorkload::iter() {
        println!("{:<14} {}", w.to_string(), w.describe());
    }
}

fn resolve_exec(scenario: &str, exec: Option<&str>) -> Result<BuiltinWorkload, RunError> {
    let Some(exec) = exec else {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "scenario `{scenario}` has no `exec` (see `surge workloads`)"
        )));
    };
    BuiltinWorkload::from_str(exec).map_err(|_| {
        RunError::InvalidInput(anyhow::anyhow!(
            "scenario `{scenario}`: unknown workload `{exec}` (see `surge workloads`)"
        ))
    })
}

async fn write_summary(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
