use super::super::args::RegressArgs;
use super::{exit_codes, print_json, Ctx};
use voxgate_core::regression::{RegressionFinding, RegressionService, ScriptRegressionOutcome};

pub fn cmd_regress(ctx: &Ctx, args: RegressArgs) -> anyhow::Result<i32> {
    let cfg = ctx.engine_config()?;
    let svc = RegressionService::new(
        ctx.open_store()?,
        cfg.regression.metrics.clone(),
        cfg.fingerprint(),
    );

    let outcomes = match &args.script {
        Some(id) => vec![svc.run_for_script(id)?],
        None => svc.run_all()?,
    };
    let total: usize = outcomes.iter().map(|o| o.regressions()).sum();

    match args.format.as_str() {
        "json" => print_json(&outcomes)?,
        _ => print_text(&outcomes),
    }

    if total > 0 {
        Ok(exit_codes::TEST_FAILED)
    } else {
        Ok(exit_codes::OK)
    }
}

fn print_text(outcomes: &[ScriptRegressionOutcome]) {
    for o in outcomes {
        match o {
            ScriptRegressionOutcome::NoBaseline { script_id } => {
                println!("{}: no baseline yet", script_id)
            }
            ScriptRegressionOutcome::NoResults { script_id } => {
                println!("{}: no recorded results", script_id)
            }
            ScriptRegressionOutcome::Compared {
                script_id,
                baseline_version,
                report,
                ..
            } => {
                if !report.has_regressions() {
                    println!("{}: ok (baseline v{})", script_id, baseline_version);
                    continue;
                }
                println!(
                    "{}: {} regression(s) against baseline v{}",
                    script_id, report.summary.total_regressions, baseline_version
                );
                for f in &report.findings {
                    match f {
                        RegressionFinding::Status {
                            baseline_status,
                            current_status,
                            ..
                        } => println!("  status {} -> {}", baseline_status, current_status),
                        RegressionFinding::Metric {
                            metric,
                            baseline_value,
                            current_value,
                            change_pct,
                            ..
                        } => println!(
                            "  {} {} -> {} ({:+.1}%)",
                            metric, baseline_value, current_value, change_pct
                        ),
                    }
                }
            }
        }
    }
}
