use std::path::PathBuf;
use anyhow::{bail, Context};
use clap::Parser;
use eternal_history::{AppConfig, AppContext};
use tracing_subscriber::{fmt, EnvFilter};
use tracing::{error, info};
use tokio::runtime::Handle;

#[derive(Parser, Debug)]
#[command(author, version, about = "Shared eternal shell history mounted as a single file", long_about = None)]
struct Args {
    /// 挂载点路径
    mount: PathBuf,

    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 内容组装超时（毫秒）
    #[arg(long)]
    scan_timeout_ms: Option<u64>,

    /// 写入失败后的重试间隔（毫秒）
    #[arg(long)]
    put_retry_delay_ms: Option<u64>,

    /// 读缓存新鲜度窗口（毫秒）
    #[arg(long)]
    cache_freshness_window_ms: Option<u64>,

    /// 写队列容量
    #[arg(long)]
    queue_capacity: Option<usize>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };
        if let Some(v) = self.scan_timeout_ms {
            config.scan_timeout_ms = v;
        }
        if let Some(v) = self.put_retry_delay_ms {
            config.put_retry_delay_ms = v;
        }
        if let Some(v) = self.cache_freshness_window_ms {
            config.cache_freshness_window_ms = v;
        }
        if let Some(v) = self.queue_capacity {
            config.queue_capacity = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // 初始化日志系统
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .init();

    // 缺少挂载点时 clap 打印用法并以状态码 2 退出
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.load_config().context("加载配置失败")?;
    info!("初始化, 挂载点={:?}, 表={}", args.mount, config.table_name);

    if !args.mount.is_dir() {
        bail!("挂载点不是目录: {:?}", args.mount);
    }

    let ctx = AppContext::bootstrap(config)
        .await
        .context("初始化远端存储失败")?;

    let session = ctx
        .filesystem(Handle::current())
        .mount(&args.mount)
        .with_context(|| format!("挂载失败: {:?}", args.mount))?;
    info!("文件系统挂载成功");

    tokio::signal::ctrl_c().await.context("无法监听 Ctrl+C 信号")?;
    info!("接收到中断信号，准备卸载文件系统...");

    // drop session 会卸载并等待 FUSE 线程退出，期间 FUSE 线程仍可能需要运行时
    tokio::task::spawn_blocking(move || drop(session))
        .await
        .context("卸载文件系统失败")?;
    info!("文件系统已卸载");

    ctx.shutdown().await;
    Ok(())
}
