//! イメージ参照（タグ）の検証
//!
//! docker distribution のリファレンス文法に従ってイメージ名を検証・分解します。

use crate::error::{BuildError, BuildResult};
use regex::Regex;
use std::sync::LazyLock;

/// `name[:tag][@digest]` にマッチする正規表現（アンカー付き）
static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    let alpha_numeric = r"[a-z0-9]+";
    let separator = r"(?:[._]|__|[-]+)";
    let name_component = format!("{alpha_numeric}(?:{separator}{alpha_numeric})*");
    let domain_component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let domain = format!(r"{domain_component}(?:\.{domain_component})*(?::[0-9]+)?");
    let name = format!("(?:{domain}/)?{name_component}(?:/{name_component})*");
    let tag = r"[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}";
    let digest = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";

    Regex::new(&format!("^({name})(?::({tag}))?(?:@({digest}))?$"))
        .expect("reference pattern is built from constants")
});

const NAME_TOTAL_LENGTH_MAX: usize = 255;

/// 分解済みのイメージ参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// レジストリホスト（例: "us.icr.io", "localhost:5000"）
    pub domain: Option<String>,
    /// リポジトリパス（例: "namespace/app"）
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// イメージ参照を解析
    ///
    /// # Examples
    /// - `us.icr.io/ns/app:1.0` -> domain `us.icr.io`, path `ns/app`, tag `1.0`
    /// - `localhost:5000/app` -> domain `localhost:5000`, path `app`
    /// - `myuser/app` -> domain なし, path `myuser/app`
    pub fn parse(reference: &str) -> BuildResult<Self> {
        let captures = REFERENCE_REGEX
            .captures(reference)
            .ok_or_else(|| BuildError::InvalidReference(reference.to_string()))?;

        let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(BuildError::InvalidReference(format!(
                "repository name must not be more than {} characters",
                NAME_TOTAL_LENGTH_MAX
            )));
        }

        let (domain, path) = split_domain(name);

        Ok(Self {
            domain,
            path,
            tag: captures.get(2).map(|m| m.as_str().to_string()),
            digest: captures.get(3).map(|m| m.as_str().to_string()),
        })
    }

    /// タグ付きの正規化された名前を返す（タグ省略時は `latest`）
    pub fn canonical_name(&self) -> String {
        let repository = match &self.domain {
            Some(domain) => format!("{}/{}", domain, self.path),
            None => self.path.clone(),
        };
        format!(
            "{}:{}",
            repository,
            self.tag.as_deref().unwrap_or("latest")
        )
    }
}

/// 文字列がイメージ参照の文法に従っているか
pub fn is_valid(reference: &str) -> bool {
    REFERENCE_REGEX.is_match(reference)
}

/// 先頭要素がレジストリかどうかを判定して分割
///
/// `.` か `:` を含む、または `localhost` の場合にレジストリとみなす
fn split_domain(name: &str) -> (Option<String>, String) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first.to_string()), rest.to_string())
        }
        _ => (None, name.to_string()),
    }
}
