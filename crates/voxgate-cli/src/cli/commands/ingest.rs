use super::super::args::IngestArgs;
use super::{exit_codes, print_json, Ctx};
use anyhow::Context;
use serde::Serialize;
use std::io::BufRead;
use voxgate_core::escalation::EscalationAction;
use voxgate_core::pipeline::{IngestOutcome, IngestRecord, ValidationPipeline};

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    steps: usize,
    auto_pass: usize,
    auto_fail: usize,
    escalated: usize,
    script_results: usize,
    defects_created: Vec<String>,
}

pub fn cmd_ingest(ctx: &Ctx, args: IngestArgs) -> anyhow::Result<i32> {
    let cfg = ctx.engine_config()?;
    let store = ctx.open_store()?;
    let pipeline = ValidationPipeline::new(store, &cfg);

    let reader: Box<dyn BufRead> = if args.input.as_os_str() == "-" {
        Box::new(std::io::BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(&args.input)
            .with_context(|| format!("failed to open {}", args.input.display()))?;
        Box::new(std::io::BufReader::new(file))
    };

    let mut summary = IngestSummary::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: IngestRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("line {}: invalid record: {}", idx + 1, e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        };
        match pipeline.ingest(&record)? {
            IngestOutcome::Step(outcome) => {
                summary.steps += 1;
                match outcome.action {
                    EscalationAction::AutoPass => summary.auto_pass += 1,
                    EscalationAction::AutoFail => summary.auto_fail += 1,
                    EscalationAction::Escalate => summary.escalated += 1,
                }
                if let Some(d) = &outcome.defect {
                    summary.defects_created.push(d.id.clone());
                }
            }
            IngestOutcome::ScriptResult { .. } => summary.script_results += 1,
        }
    }

    print_json(&summary)?;
    Ok(exit_codes::OK)
}
