use std::sync::Arc;

use anyhow::{Context, Result};
use billing_agent::app::Application;
use billing_agent::shutdown::{wait_for_signal, ShutdownManager};
use billing_core::logging::init_logging;
use billing_core::AppConfig;
use billing_domain::{TaskSpec, TaskStatus, TaskType};
use clap::{Arg, ArgMatches, Command};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

fn cli() -> Command {
    Command::new("billing-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("保险理赔计费后台任务调度代理")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("配置文件路径，缺省时按默认位置查找"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("日志级别，覆盖配置文件"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .global(true)
                .value_parser(["json", "pretty", "compact"])
                .help("日志格式，覆盖配置文件"),
        )
        .subcommand(Command::new("run").about("启动调度代理，直到收到Ctrl+C或SIGTERM"))
        .subcommand(
            Command::new("create")
                .about("创建任务")
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .required(true)
                        .help("任务类型，例如 CHECK_ELIGIBILITY 或 check-eligibility"),
                )
                .arg(Arg::new("entity-id").long("entity-id").required(true))
                .arg(Arg::new("entity-type").long("entity-type").required(true))
                .arg(
                    Arg::new("priority")
                        .long("priority")
                        .value_parser(clap::value_parser!(i32))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("max-attempts")
                        .long("max-attempts")
                        .value_parser(clap::value_parser!(i32)),
                )
                .arg(
                    Arg::new("delay-seconds")
                        .long("delay-seconds")
                        .value_parser(clap::value_parser!(i64))
                        .help("延迟执行的秒数"),
                )
                .arg(
                    Arg::new("metadata")
                        .long("metadata")
                        .value_name("JSON")
                        .help("任务元数据，JSON对象"),
                ),
        )
        .subcommand(Command::new("get").about("查看任务").arg(Arg::new("id").required(true)))
        .subcommand(
            Command::new("list")
                .about("列出任务")
                .arg(Arg::new("status").long("status"))
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
        .subcommand(
            Command::new("retry")
                .about("重试已失败的任务")
                .arg(Arg::new("id").required(true)),
        )
        .subcommand(Command::new("delete").about("删除任务").arg(Arg::new("id").required(true)))
        .subcommand(Command::new("status").about("查看代理与任务统计"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;
    config.logging = config
        .logging
        .clone()
        .with_overrides(
            matches.get_one::<String>("log-level").map(String::as_str),
            matches.get_one::<String>("log-format").map(String::as_str),
        )
        .context("解析日志参数失败")?;
    init_logging(&config.logging)?;

    let app = Application::new(config).await?;

    match matches.subcommand() {
        Some(("run", _)) => run(app).await,
        Some((command, args)) => {
            let outcome = execute(&app, command, args).await;
            app.shutdown().await?;
            outcome
        }
        None => Ok(()),
    }
}

async fn run(app: Application) -> Result<()> {
    let app = Arc::new(app);
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let app_handle = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    wait_for_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match app_handle.await {
        Ok(Ok(())) => info!("计费调度代理已退出"),
        Ok(Err(e)) => error!("应用运行失败: {e:#}"),
        Err(e) => error!("应用任务异常退出: {e}"),
    }
    Ok(())
}

async fn execute(app: &Application, command: &str, args: &ArgMatches) -> Result<()> {
    let agent = app.agent();

    match command {
        "create" => {
            let spec = task_spec_from_args(args)?;
            print_json(&agent.create_task(spec).await?)
        }
        "get" => {
            let id = parse_id(args)?;
            match agent.get_task_by_id(id).await? {
                Some(task) => print_json(&task),
                None => Err(anyhow::anyhow!("任务不存在: {id}")),
            }
        }
        "list" => {
            let status = args
                .get_one::<String>("status")
                .map(|s| s.parse::<TaskStatus>())
                .transpose()?;
            let tasks = agent
                .get_tasks(
                    status,
                    args.get_one::<i64>("limit").copied(),
                    args.get_one::<i64>("offset").copied(),
                )
                .await?;
            print_json(&tasks)
        }
        "retry" => print_json(&agent.retry_task(parse_id(args)?).await?),
        "delete" => {
            let id = parse_id(args)?;
            let deleted = agent.delete_task(id).await?;
            print_json(&serde_json::json!({ "id": id, "deleted": deleted }))
        }
        "status" => print_json(&agent.get_status().await?),
        other => Err(anyhow::anyhow!("不支持的命令: {other}")),
    }
}

fn task_spec_from_args(args: &ArgMatches) -> Result<TaskSpec> {
    let task_type: TaskType = args
        .get_one::<String>("type")
        .context("缺少任务类型")?
        .parse()?;
    let entity_id = args.get_one::<String>("entity-id").context("缺少实体ID")?;
    let entity_type = args
        .get_one::<String>("entity-type")
        .context("缺少实体类型")?;

    let mut spec = TaskSpec::new(task_type, entity_id.as_str(), entity_type.as_str())
        .with_priority(args.get_one::<i32>("priority").copied().unwrap_or(0));

    if let Some(max_attempts) = args.get_one::<i32>("max-attempts") {
        spec = spec.with_max_attempts(*max_attempts);
    }
    if let Some(delay) = args.get_one::<i64>("delay-seconds") {
        spec = spec.with_scheduled_for(chrono::Utc::now() + chrono::Duration::seconds(*delay));
    }
    if let Some(metadata) = args.get_one::<String>("metadata") {
        let metadata = serde_json::from_str(metadata).context("元数据不是有效的JSON")?;
        spec = spec.with_metadata(metadata);
    }
    Ok(spec)
}

fn parse_id(args: &ArgMatches) -> Result<Uuid> {
    let raw = args.get_one::<String>("id").context("缺少任务ID")?;
    Uuid::parse_str(raw).with_context(|| format!("无效的任务ID: {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
