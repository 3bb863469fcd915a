use super::super::args::ServeArgs;
use super::{exit_codes, print_json, Ctx};
use std::sync::Arc;
use tokio::sync::mpsc;
use voxgate_core::defects::PatternService;
use voxgate_core::feedback::{FeedbackRelay, HttpSink, JsonlSink, OverrideSink};
use voxgate_core::jobs::{JobContext, Scheduler, WorkerPool};
use voxgate_core::regression::RegressionService;

pub async fn cmd_serve(ctx: &Ctx, args: ServeArgs) -> anyhow::Result<i32> {
    let cfg = ctx.engine_config()?;
    let store = ctx.open_store()?;

    let sink: Option<Arc<dyn OverrideSink>> = match (&args.sink_jsonl, &args.sink_url) {
        (Some(path), _) => Some(Arc::new(JsonlSink::new(path))),
        (None, Some(url)) => Some(Arc::new(HttpSink::new(url.clone()))),
        (None, None) => None,
    };

    let job_ctx = Arc::new(JobContext {
        regressions: RegressionService::new(
            store.clone(),
            cfg.regression.metrics.clone(),
            cfg.fingerprint(),
        ),
        patterns: PatternService::new(store.clone(), cfg.defects.title_similarity),
        relay: sink.map(|s| FeedbackRelay::new(store.clone(), s)),
        store,
    });
    let pool = WorkerPool::new(job_ctx.clone(), &cfg.jobs);

    if args.once {
        let jobs = job_ctx.sweep()?;
        let reports = pool.run_batch(jobs).await?;
        let failed = reports.iter().filter(|r| !r.succeeded()).count();
        print_json(&reports)?;
        return Ok(if failed > 0 {
            exit_codes::CONFIG_ERROR
        } else {
            exit_codes::OK
        });
    }

    tracing::info!(
        event = "voxgate.serve.start",
        workers = cfg.jobs.workers,
        interval_seconds = cfg.jobs.interval_seconds,
        "job daemon started"
    );

    let (tx, rx) = mpsc::channel(cfg.jobs.workers.max(1) * 4);
    let scheduler = Scheduler::new(job_ctx, &cfg.jobs).spawn(tx);

    tokio::select! {
        res = pool.serve(rx) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(event = "voxgate.serve.stop", "shutdown requested");
        }
    }
    scheduler.abort();
    Ok(exit_codes::OK)
}
