use super::super::args::{QueueArgs, QueueSub};
use super::{exit_codes, print_json, Ctx};
use voxgate_core::errors::EngineError;
use voxgate_core::queue::{ClaimOutcome, DecisionSubmission, HumanDecision, HumanValidationQueue};

/// Refusals by the queue state machine are a normal outcome, not a crash.
fn refused(e: EngineError) -> anyhow::Result<i32> {
    match e {
        EngineError::NotFound { .. }
        | EngineError::Forbidden { .. }
        | EngineError::InvalidTransition { .. }
        | EngineError::NotClaimant { .. } => {
            eprintln!("{}", e);
            Ok(exit_codes::TEST_FAILED)
        }
        other => Err(other.into()),
    }
}

pub fn cmd_queue(ctx: &Ctx, args: QueueArgs) -> anyhow::Result<i32> {
    let cfg = ctx.engine_config()?;
    let q = HumanValidationQueue::new(ctx.open_store()?, cfg.queue);

    match args.cmd {
        QueueSub::Next {
            tenant,
            validator,
            language,
        } => match q.get_next(&validator, &tenant, language.as_deref())? {
            Some(item) => {
                print_json(&item)?;
                Ok(exit_codes::OK)
            }
            None => {
                eprintln!("queue empty");
                Ok(exit_codes::OK)
            }
        },
        QueueSub::Claim {
            queue_id,
            tenant,
            validator,
        } => match q.claim(&queue_id, &validator, &tenant) {
            Ok(ClaimOutcome::Claimed(item)) => {
                print_json(&item)?;
                Ok(exit_codes::OK)
            }
            Ok(ClaimOutcome::NotAvailable { status }) => {
                eprintln!("{} is not available ({})", queue_id, status);
                Ok(exit_codes::TEST_FAILED)
            }
            Err(e) => refused(e),
        },
        QueueSub::Release { queue_id, tenant } => match q.release(&queue_id, &tenant) {
            Ok(item) => {
                print_json(&item)?;
                Ok(exit_codes::OK)
            }
            Err(e) => refused(e),
        },
        QueueSub::Submit {
            queue_id,
            tenant,
            validator,
            decision,
            feedback,
            time_spent,
        } => {
            let Some(decision) = HumanDecision::parse(&decision) else {
                eprintln!("decision must be 'pass' or 'fail' (got '{}')", decision);
                return Ok(exit_codes::CONFIG_ERROR);
            };
            let submission = DecisionSubmission {
                decision,
                feedback,
                time_spent_seconds: time_spent,
            };
            match q.submit_decision(&queue_id, &validator, &tenant, &submission) {
                Ok(hv) => {
                    print_json(&hv)?;
                    Ok(exit_codes::OK)
                }
                Err(e) => refused(e),
            }
        }
        QueueSub::Stats { tenant, validator } => {
            let stats = q.get_stats(&tenant)?;
            let performance = match validator {
                Some(v) => match q.validator_performance(&v, &tenant) {
                    Ok(p) => Some(serde_json::json!({
                        "validator_id": p.validator_id,
                        "total_validations": p.total_validations,
                        "total_time_seconds": p.total_time_seconds,
                        "override_count": p.override_count,
                        "average_time_seconds": p.average_time_seconds(),
                        "override_rate": p.override_rate(),
                    })),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e.into()),
                },
                None => None,
            };
            print_json(&serde_json::json!({
                "tenant_id": tenant,
                "pending": stats.pending,
                "claimed": stats.claimed,
                "completed": stats.completed,
                "total": stats.total(),
                "average_wait_seconds": stats.average_wait_seconds,
                "validator": performance,
            }))?;
            Ok(exit_codes::OK)
        }
    }
}
