use super::super::args::{BaselineArgs, BaselineSub};
use super::{exit_codes, print_json, Ctx};
use anyhow::Context;
use voxgate_core::baseline::BaselineManager;
use voxgate_core::model::ScriptSnapshot;

pub fn cmd_baseline(ctx: &Ctx, args: BaselineArgs) -> anyhow::Result<i32> {
    let mgr = BaselineManager::new(ctx.open_store()?);

    match args.cmd {
        BaselineSub::Approve {
            script_id,
            by,
            note,
            snapshot,
        } => {
            let result = match snapshot {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
                    let snap: ScriptSnapshot =
                        serde_json::from_str(&raw).context("invalid snapshot JSON")?;
                    mgr.approve(&script_id, &snap, &by, note.as_deref())
                }
                None => mgr.approve_latest(&script_id, &by, note.as_deref()),
            };
            match result {
                Ok(b) => {
                    eprintln!("Approved {} v{}", b.script_id, b.version);
                    print_json(&b)?;
                    Ok(exit_codes::OK)
                }
                Err(e) if e.is_not_found() => {
                    eprintln!("{} (record an execution first or pass --snapshot)", e);
                    Ok(exit_codes::TEST_FAILED)
                }
                Err(e) => Err(e.into()),
            }
        }
        BaselineSub::Show { script_id, version } => {
            let found = match version {
                Some(v) => mgr.get_version(&script_id, v),
                None => mgr.get(&script_id),
            };
            match found {
                Ok(b) => {
                    print_json(&b)?;
                    Ok(exit_codes::OK)
                }
                Err(e) if e.is_not_found() => {
                    eprintln!("{}", e);
                    Ok(exit_codes::TEST_FAILED)
                }
                Err(e) => Err(e.into()),
            }
        }
        BaselineSub::History { script_id } => {
            print_json(&mgr.history(&script_id)?)?;
            Ok(exit_codes::OK)
        }
    }
}
