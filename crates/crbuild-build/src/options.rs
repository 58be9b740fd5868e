//! ビルドオプションと実行
//!
//! タグ検証 → セッション確立 → コマンド構成 → 実行 の直線的な処理。
//! リトライはしません。

use crate::adapter::BuildAdapter;
use crate::cli::{BuilderCli, InputStream, OutputStream};
use crate::command::{
    BuildCommand, FLAG_BUILD_ARG, FLAG_DISABLE_CONTENT_TRUST, FLAG_FILE, FLAG_NO_CACHE, FLAG_PULL,
    FLAG_QUIET, FLAG_TAG, STDIN_CONTEXT,
};
use crate::error::{BuildError, BuildResult};
use crate::reference;
use crate::session::SessionConnector;
use std::path::PathBuf;

/// ユーザーが指定したビルドフラグ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFlags {
    pub no_cache: bool,
    pub pull: bool,
    pub quiet: bool,
    /// `K=V` 形式
    pub build_args: Vec<String>,
    /// Dockerfile のパス（空ならコンテキスト直下の Dockerfile）
    pub file: String,
    pub tag: String,
}

/// 1回のビルド実行に必要なもの一式
pub struct BuildOptions {
    pub input: InputStream,
    pub out: OutputStream,
    pub err: OutputStream,
    /// 位置引数（先頭がビルドコンテキスト）
    pub args: Vec<String>,
    pub flags: BuildFlags,
}

impl BuildOptions {
    /// 標準入出力を使うオプションを作成
    pub fn new(args: Vec<String>, flags: BuildFlags) -> Self {
        Self {
            input: Box::new(std::io::stdin()),
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
            args,
            flags,
        }
    }

    /// ビルドを実行
    ///
    /// 実行結果のエラーはそのまま返す。
    pub async fn run(self, connector: &dyn SessionConnector) -> BuildResult<()> {
        let BuildOptions {
            input,
            out,
            err,
            args,
            flags,
        } = self;

        // 1. タグの検証（不正ならセッションを作らない）
        if !reference::is_valid(&flags.tag) {
            return Err(BuildError::InvalidReference(flags.tag));
        }

        // 2. セッション確立
        let (session, image_name) = connector
            .connect(&flags.tag)
            .await
            .map_err(|e| BuildError::Connection(Box::new(e)))?;
        tracing::debug!("Connected to registry build service for {}", image_name);

        // 3. コンテキストパスの解決
        let context = resolve_context_path(args.first().map(String::as_str).unwrap_or_default())?;

        // 4-5. ホストとコマンドの構成
        let cli = BuilderCli::new(BuildAdapter::new(session), input, out, err);
        let mut command = BuildCommand::new(Box::new(cli));

        // 6. フラグの変換
        translate_flags(&flags, &image_name, &mut command)?;

        // 7. 実行
        command.run(&[context]).await
    }
}

/// コンテキストパスを絶対パスに変換（`-` はそのまま）
fn resolve_context_path(context: &str) -> BuildResult<String> {
    if context == STDIN_CONTEXT {
        return Ok(context.to_string());
    }

    let absolute = std::path::absolute(context).map_err(|source| BuildError::ContextPath {
        path: PathBuf::from(context),
        source,
    })?;
    Ok(absolute.to_string_lossy().into_owned())
}

/// ビルドフラグをコマンドのフラグへ1つずつ設定
///
/// コンテントトラストは常に無効化する。
pub fn translate_flags(
    flags: &BuildFlags,
    image_name: &str,
    command: &mut BuildCommand,
) -> BuildResult<()> {
    let flag_set = command.flags_mut();

    flag_set.set(FLAG_TAG, image_name)?;
    flag_set.set(FLAG_NO_CACHE, &flags.no_cache.to_string())?;
    flag_set.set(FLAG_QUIET, &flags.quiet.to_string())?;
    flag_set.set(FLAG_PULL, &flags.pull.to_string())?;
    flag_set.set(FLAG_FILE, &flags.file)?;
    for build_arg in &flags.build_args {
        flag_set.set(FLAG_BUILD_ARG, build_arg)?;
    }
    flag_set.set(FLAG_DISABLE_CONTENT_TRUST, "true")?;

    Ok(())
}
