//! PPT Agent - 汇报 PPT 智能生成
//!
//! 入口：初始化日志、加载配置、创建编排器，一键运行流水线并打印质量报告。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ppt_agent::consult::UserConfig;
use ppt_agent::core::builder::create_pipeline_builder;
use ppt_agent::observability;

#[derive(Parser, Debug)]
#[command(name = "ppt-agent", version, about = "从素材文档生成汇报 PPT")]
struct Cli {
    #[arg(short, long = "input", required = true, num_args = 1.., help = "素材文件或目录（可多个）")]
    inputs: Vec<PathBuf>,
    #[arg(short, long, help = "模板版式清单（TOML）；缺省使用内置版式")]
    template: Option<PathBuf>,
    #[arg(short, long, default_value = "output/presentation.json")]
    output: PathBuf,
    #[arg(long, help = "PPT 标题")]
    title: Option<String>,
    #[arg(long, help = "汇报场景，如 季度汇报、项目总结")]
    scenario: Option<String>,
    #[arg(long, help = "核心汇报意图")]
    intent: Option<String>,
    #[arg(long, help = "目标受众")]
    audience: Option<String>,
    #[arg(long, help = "页数限制，如 15 或 15-20页")]
    pages: Option<String>,
    #[arg(long, help = "语言风格")]
    style: Option<String>,
    #[arg(short, long, help = "额外的配置文件")]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = false, help = "以 JSON 输出报告")]
    json: bool,
}

impl Cli {
    fn user_config(&self) -> UserConfig {
        UserConfig {
            presentation_title: self.title.clone(),
            scenario: self.scenario.clone(),
            core_intent: self.intent.clone(),
            audience: self.audience.clone(),
            page_limit: self.pages.clone(),
            language_style: self.style.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let mut orchestrator = create_pipeline_builder(cli.config.clone()).build();

    // Ctrl-C 只设置取消信号，流水线在下一个检查点停止
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling pipeline");
            cancel.cancel();
        }
    });

    let report = orchestrator
        .run(&cli.inputs, cli.template.as_deref(), &cli.user_config(), &cli.output)
        .await
        .context("Pipeline failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report).context("Failed to encode report")?);
    } else {
        println!("{report}");
    }
    Ok(())
}
