use crate::error::{BuildError, BuildResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tar::Builder;

/// コンテキスト外の Dockerfile をアーカイブに追加するときの名前
pub const EXTERNAL_DOCKERFILE_NAME: &str = ".crbuild.Dockerfile";

const DEFAULT_DOCKERFILE_NAME: &str = "Dockerfile";
const DOCKERIGNORE_FILE: &str = ".dockerignore";

/// 作成済みのビルドコンテキスト
#[derive(Debug)]
pub struct ContextArchive {
    /// tar.gz アーカイブ
    pub data: Vec<u8>,
    /// アーカイブ内の Dockerfile のパス
    pub dockerfile: String,
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// `dockerfile` が None の場合はコンテキスト直下の Dockerfile を使用。
    /// 相対パスはカレントディレクトリ基準で解決する。
    pub fn create_context(
        context_path: &Path,
        dockerfile: Option<&Path>,
    ) -> BuildResult<ContextArchive> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }

        let dockerfile_path = Self::resolve_dockerfile(context_path, dockerfile)?;
        let ignore = IgnoreRules::load(context_path)?;

        // コンテキスト内の Dockerfile はそのまま、外部のものは別名で追加
        let internal_name = dockerfile_path
            .strip_prefix(context_path)
            .ok()
            .map(to_archive_path);

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.follow_symlinks(false);

            let keep = [
                internal_name.clone().unwrap_or_default(),
                DOCKERIGNORE_FILE.to_string(),
            ];
            append_dir(&mut tar, context_path, context_path, &ignore, &keep)?;

            if internal_name.is_none() {
                let content = fs::read(&dockerfile_path)?;
                let mut header = tar::Header::new_gnu();
                header.set_path(EXTERNAL_DOCKERFILE_NAME).map_err(|e| {
                    BuildError::InvalidConfig(format!("Failed to set Dockerfile path: {}", e))
                })?;
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                tar.append(&header, &content[..])?;
            }

            let encoder = tar.into_inner()?;
            encoder.finish()?.flush()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        // コンテキストサイズの警告
        Self::check_context_size(archive_data.len());

        Ok(ContextArchive {
            data: archive_data,
            dockerfile: internal_name.unwrap_or_else(|| EXTERNAL_DOCKERFILE_NAME.to_string()),
        })
    }

    /// Dockerfile の絶対パスを解決し、存在を確認
    fn resolve_dockerfile(context_path: &Path, dockerfile: Option<&Path>) -> BuildResult<PathBuf> {
        let path = match dockerfile {
            Some(path) if !path.as_os_str().is_empty() => std::path::absolute(path)?,
            _ => context_path.join(DEFAULT_DOCKERFILE_NAME),
        };

        if !path.is_file() {
            return Err(BuildError::DockerfileNotFound(path));
        }

        Ok(path)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "Build context is large ({}MB). \
                 Consider excluding unneeded files with a .dockerignore file.",
                size / 1024 / 1024
            );
        }
    }
}

/// ディレクトリを再帰的にアーカイブへ追加
fn append_dir<W: Write>(
    tar: &mut Builder<W>,
    root: &Path,
    dir: &Path,
    ignore: &IgnoreRules,
    keep: &[String],
) -> BuildResult<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = to_archive_path(relative);
        let file_type = entry.file_type()?;

        let excluded = ignore.is_excluded(&name) && !keep.contains(&name);

        if file_type.is_dir() {
            // 除外ディレクトリでも、例外パターンや Dockerfile があれば中を確認する
            let prefix = format!("{}/", name);
            let holds_kept = keep.iter().any(|kept| kept.starts_with(&prefix));
            if excluded && !ignore.has_exceptions() && !holds_kept {
                continue;
            }
            if !excluded {
                tar.append_dir(&name, &path)?;
            }
            append_dir(tar, root, &path, ignore, keep)?;
        } else if !excluded {
            tar.append_path_with_name(&path, &name)?;
        }
    }

    Ok(())
}

/// アーカイブ内のパス表記（`/` 区切り）に変換
fn to_archive_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// .dockerignore のルール
#[derive(Debug, Default)]
struct IgnoreRules {
    /// (パターン, 例外パターンか)
    rules: Vec<(Pattern, bool)>,
}

impl IgnoreRules {
    fn load(context_path: &Path) -> BuildResult<Self> {
        let path = context_path.join(DOCKERIGNORE_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        Self::parse(&fs::read_to_string(path)?)
    }

    fn parse(content: &str) -> BuildResult<Self> {
        let mut rules = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (pattern, exception) = match line.strip_prefix('!') {
                Some(rest) => (rest.trim(), true),
                None => (line, false),
            };
            let pattern = pattern.trim_start_matches("./").trim_start_matches('/');
            let pattern = pattern.trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }

            let compiled = Pattern::new(pattern).map_err(|e| {
                BuildError::InvalidConfig(format!("Invalid .dockerignore pattern '{}': {}", line, e))
            })?;
            rules.push((compiled, exception));
        }

        Ok(Self { rules })
    }

    fn has_exceptions(&self) -> bool {
        self.rules.iter().any(|(_, exception)| *exception)
    }

    /// 後に書かれたルールが優先される
    fn is_excluded(&self, name: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        let mut excluded = false;
        for (pattern, exception) in &self.rules {
            // パターンに一致するディレクトリ配下も対象
            let matched = ancestors(name).any(|candidate| pattern.matches_with(candidate, options));
            if matched {
                excluded = !exception;
            }
        }
        excluded
    }
}

/// "a/b/c" -> "a/b/c", "a/b", "a"
fn ancestors(name: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(name), |current| {
        current.rfind('/').map(|pos| &current[..pos])
    })
}
