use clap::Parser;
use std::path::PathBuf;

// ─── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    version,
    about = "为音频文件计算 MixRamp 淡入淡出标签，结果写到标准输出",
)]
pub struct Cli {
    /// 在标准错误上显示详细信息
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// 输入音频文件
    pub path: PathBuf,
}
