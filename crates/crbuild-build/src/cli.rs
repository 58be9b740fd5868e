//! ビルドコマンドのホスト
//!
//! リモートビルド用のクライアントと入出力ストリームを
//! 汎用ビルドコマンドへ提供します。

use crate::adapter::BuildAdapter;
use crate::client::ImageBuildClient;
use crate::command::CommandHost;
use crate::config::ConfigFile;
use std::io::{Read, Write};

pub type InputStream = Box<dyn Read + Send>;
pub type OutputStream = Box<dyn Write + Send>;

pub struct BuilderCli {
    client: BuildAdapter,
    input: InputStream,
    out: OutputStream,
    err: OutputStream,
}

impl BuilderCli {
    pub fn new(
        client: BuildAdapter,
        input: InputStream,
        out: OutputStream,
        err: OutputStream,
    ) -> Self {
        Self {
            client,
            input,
            out,
            err,
        }
    }
}

impl CommandHost for BuilderCli {
    fn client(&self) -> &dyn ImageBuildClient {
        &self.client
    }

    /// 認証情報はセッション側で扱うため、常に空
    fn config_file(&self) -> ConfigFile {
        ConfigFile::default()
    }

    fn input(&mut self) -> &mut dyn Read {
        &mut self.input
    }

    fn out(&mut self) -> &mut dyn Write {
        &mut self.out
    }

    fn err(&mut self) -> &mut dyn Write {
        &mut self.err
    }
}
