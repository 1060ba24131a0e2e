// ==========================================
// 屋面估价引擎 - 命令行入口
// ==========================================
// 用法:
//   roof-estimate-engine [--db <path>] <command> [args...]
//
// 命令输出 JSON 到 stdout, 日志写 stderr
// ==========================================

use std::error::Error;
use std::path::Path;

use roof_estimate::api::{CreateEstimateRequest, LineItemInput};
use roof_estimate::app::{get_default_db_path, AppState};
use roof_estimate::engine::RollupPercentages;
use roof_estimate::logging;
use serde::Serialize;

const USAGE: &str = "\
用法: roof-estimate-engine [--db <path>] <command> [args...]

命令:
  init                              初始化数据库
  import-catalog <csv>              导入价目表
  import-geo <csv>                  导入区域定价
  create <request.json>             创建估价单
  add-item <estimate_id> <item.json> 新增明细
  recalc <estimate_id>              全量重算
  percentages <estimate_id> <overhead> <profit> <tax>
                                    调整费率并重新汇总
  send|accept|decline|expire <estimate_id>
                                    状态流转
  delete <estimate_id>              删除草稿估价单
  show <estimate_id>                查看估价单及明细
  versions <subject_id>             列出全部版本
  current <subject_id>              当前估价单
  config-set <key> <value>          写入全局配置并输出全部配置";

fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let db_path = match args.iter().position(|a| a == "--db") {
        Some(pos) => {
            if pos + 1 >= args.len() {
                return Err("--db 缺少路径参数".into());
            }
            let path = args.remove(pos + 1);
            args.remove(pos);
            path
        }
        None => get_default_db_path(),
    };

    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    tracing::info!(version = roof_estimate::VERSION, db_path = %db_path, command = %command, "启动");
    let state = AppState::new(db_path)?;
    let api = &state.estimate_api;

    match command.as_str() {
        "init" => print_json(&serde_json::json!({ "db_path": state.db_path }))?,
        "import-catalog" => {
            let summary = state.catalog_importer().import_catalog(Path::new(arg(rest, 0, "csv")?))?;
            print_json(&summary)?;
        }
        "import-geo" => {
            let summary = state
                .catalog_importer()
                .import_geo_pricing(Path::new(arg(rest, 0, "csv")?))?;
            print_json(&summary)?;
        }
        "create" => {
            let request: CreateEstimateRequest = read_json(arg(rest, 0, "request.json")?)?;
            print_json(&api.create_estimate(request)?)?;
        }
        "add-item" => {
            let estimate_id = arg(rest, 0, "estimate_id")?;
            let input: LineItemInput = read_json(arg(rest, 1, "item.json")?)?;
            print_json(&api.add_line_item(estimate_id, input)?)?;
        }
        "recalc" => print_json(&api.recalculate_estimate(arg(rest, 0, "estimate_id")?)?)?,
        "percentages" => {
            let estimate_id = arg(rest, 0, "estimate_id")?;
            let pct = RollupPercentages::new(
                arg(rest, 1, "overhead")?.parse()?,
                arg(rest, 2, "profit")?.parse()?,
                arg(rest, 3, "tax")?.parse()?,
            );
            print_json(&api.update_percentages(estimate_id, pct)?)?;
        }
        "send" => print_json(&api.send_estimate(arg(rest, 0, "estimate_id")?)?)?,
        "accept" => print_json(&api.accept_estimate(arg(rest, 0, "estimate_id")?)?)?,
        "decline" => print_json(&api.decline_estimate(arg(rest, 0, "estimate_id")?)?)?,
        "expire" => print_json(&api.expire_estimate(arg(rest, 0, "estimate_id")?)?)?,
        "delete" => {
            let estimate_id = arg(rest, 0, "estimate_id")?;
            api.delete_estimate(estimate_id)?;
            print_json(&serde_json::json!({ "deleted": estimate_id }))?;
        }
        "show" => print_json(&api.get_estimate(arg(rest, 0, "estimate_id")?)?)?,
        "versions" => print_json(&api.list_versions(arg(rest, 0, "subject_id")?)?)?,
        "current" => print_json(&api.current_estimate(arg(rest, 0, "subject_id")?)?)?,
        "config-set" => {
            let key = arg(rest, 0, "key")?;
            let value = arg(rest, 1, "value")?;
            state.config_manager.set_config_value(key, value)?;
            print_json(&state.config_manager.get_config_snapshot()?)?;
        }
        other => {
            eprintln!("未知命令: {}\n\n{}", other, USAGE);
            return Err(format!("未知命令: {}", other).into());
        }
    }

    Ok(())
}

fn arg<'a>(rest: &'a [String], idx: usize, name: &str) -> Result<&'a str, Box<dyn Error>> {
    rest.get(idx)
        .map(String::as_str)
        .ok_or_else(|| format!("缺少参数: <{}>", name).into())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
