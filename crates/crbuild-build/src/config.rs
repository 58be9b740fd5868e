//! CLI設定ファイルのビュー
//!
//! docker の config.json と同じ形。ビルドコマンドはここから
//! レジストリ認証情報を読み取ってビルドオプションに渡します。

use bollard::auth::DockerCredentials;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// 認証情報 (レジストリ -> 資格情報)
    #[serde(default)]
    pub auths: HashMap<String, DockerCredentials>,

    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    pub creds_store: Option<String>,

    /// レジストリごとの credential helper
    #[serde(default)]
    pub cred_helpers: HashMap<String, String>,
}

impl ConfigFile {
    /// ビルドに渡すレジストリ認証情報
    ///
    /// `auths` に直接書かれたものだけを返す（credential helper は呼び出さない）
    pub fn auth_configs(&self) -> HashMap<String, DockerCredentials> {
        self.auths
            .iter()
            .map(|(registry, credentials)| {
                let mut credentials = credentials.clone();
                if credentials.serveraddress.is_none() {
                    credentials.serveraddress = Some(registry.clone());
                }
                (registry.clone(), credentials)
            })
            .collect()
    }
}
