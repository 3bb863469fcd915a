use super::super::args::{DefectsArgs, DefectsSub};
use super::{exit_codes, print_json, Ctx};
use voxgate_core::defects::PatternService;

pub fn cmd_defects(ctx: &Ctx, args: DefectsArgs) -> anyhow::Result<i32> {
    let store = ctx.open_store()?;

    match args.cmd {
        DefectsSub::List { script } => {
            print_json(&store.list_defects(script.as_deref())?)?;
        }
        DefectsSub::Patterns { refresh } => {
            if refresh {
                let cfg = ctx.engine_config()?;
                let out = PatternService::new(store, cfg.defects.title_similarity).refresh()?;
                print_json(&out)?;
            } else {
                print_json(&store.list_defect_patterns()?)?;
            }
        }
    }
    Ok(exit_codes::OK)
}
