use clap::Parser;
use colored::Colorize;
use crbuild_build::{BuildFlags, BuildOptions, RegistryConnector, SessionConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crbuild", version)]
#[command(
    about = "docker build と同じ感覚で、レジストリのビルドサービス上でイメージをビルド",
    long_about = None
)]
struct Cli {
    /// イメージ名 (<registry>/<namespace>/<repository>[:<tag>])
    #[arg(value_name = "TAG")]
    tag: String,

    /// ビルドコンテキスト（ディレクトリ、または標準入力から tar を読む場合は "-"）
    #[arg(value_name = "CONTEXT")]
    context: String,

    /// Dockerfile のパス（デフォルト: <CONTEXT>/Dockerfile）
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    file: Option<String>,

    /// ビルド引数 (KEY=VALUE、KEY のみなら環境変数の値)
    #[arg(long = "build-arg", value_name = "KEY=VALUE")]
    build_args: Vec<String>,

    /// キャッシュを使わずにビルド
    #[arg(long)]
    no_cache: bool,

    /// ベースイメージを常に pull
    #[arg(long)]
    pull: bool,

    /// ビルド出力を抑制し、成功時はイメージIDのみ表示
    #[arg(short, long)]
    quiet: bool,

    /// デバッグログを有効化
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = SessionConfig::load()?;
    let connector = RegistryConnector::new(config);

    let flags = BuildFlags {
        no_cache: cli.no_cache,
        pull: cli.pull,
        quiet: cli.quiet,
        build_args: cli.build_args,
        file: cli.file.unwrap_or_default(),
        tag: cli.tag,
    };
    let options = BuildOptions::new(vec![cli.context], flags);

    if let Err(e) = options.run(&connector).await {
        tracing::debug!("Build failed: {:?}", e);
        eprintln!("{} {}", "Error:".red().bold(), e.user_message());
        std::process::exit(1);
    }

    Ok(())
}
