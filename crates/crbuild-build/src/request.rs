//! リモートビルドリクエスト

use crate::client::ImageBuildOptions;
use crate::error::{BuildError, BuildResult};
use serde::Serialize;

/// レジストリビルドサービスに送るリクエスト
///
/// フィールド名はサービスのクエリパラメータ名と一致させる
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildRequest {
    /// イメージ名（タグ付き）
    #[serde(rename = "T")]
    pub t: String,

    #[serde(rename = "Dockerfile")]
    pub dockerfile: String,

    /// JSONエンコードされたビルド引数（なければ空文字列）
    #[serde(rename = "Buildargs")]
    pub buildargs: String,

    #[serde(rename = "Pull")]
    pub pull: bool,

    #[serde(rename = "Nocache")]
    pub nocache: bool,
}

impl BuildRequest {
    /// ビルドオプションからリクエストを作成
    ///
    /// タグが複数ある場合は先頭のみ使用（サービスは単一タグのみ受け付ける）
    pub fn from_options(options: &ImageBuildOptions) -> BuildResult<Self> {
        let t = options.tags.first().cloned().unwrap_or_default();

        let buildargs = if options.build_args.is_empty() {
            String::new()
        } else {
            encode_build_args(&options.build_args)?
        };

        Ok(Self {
            t,
            dockerfile: options.dockerfile.clone(),
            buildargs,
            pull: options.pull_parent,
            nocache: options.no_cache,
        })
    }
}

/// ビルド引数をJSON文字列にエンコード
pub fn encode_build_args<A>(args: &A) -> BuildResult<String>
where
    A: Serialize + ?Sized,
{
    serde_json::to_string(args).map_err(BuildError::BuildArgs)
}
