use std::path::Path;

use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, plan: &surge_core::TestPlan);
    fn progress(&self) -> Option<surge_core::ProgressFn>;
    fn print_summary(&self, result: &surge_core::RunResult, report: &surge_core::Report)
    -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
