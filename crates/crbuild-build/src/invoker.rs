//! リモートビルドの起動
//!
//! ビルドオプションをリクエストに変換し、レジストリのビルドサービスを
//! バックグラウンドタスクで呼び出します。出力はストリームブリッジ経由で返します。

use crate::bridge::{BridgeWriter, stream_bridge};
use crate::client::{BuildContext, ImageBuildOptions, ImageBuildResponse};
use crate::error::BuildResult;
use crate::request::BuildRequest;
use crate::session::RegistrySession;
use tokio::task::JoinHandle;

pub struct RemoteBuilder {
    session: RegistrySession,
}

impl RemoteBuilder {
    pub fn new(session: RegistrySession) -> Self {
        Self { session }
    }

    /// リモートビルドを開始
    ///
    /// リクエストの組み立てに失敗した場合はネットワークアクセス前にエラーを返す。
    /// 成功時はバックグラウンドタスクを起動し、完了を待たずにレスポンスを返す。
    /// リモート側のエラーは戻り値ではなく、ボディ内のエラーフレームとして現れる。
    pub fn image_build(
        &self,
        context: BuildContext,
        options: &ImageBuildOptions,
    ) -> BuildResult<ImageBuildResponse> {
        let (response, _task) = self.spawn_build(context, options)?;
        Ok(response)
    }

    /// `image_build` の本体。テストからタスクの完了を待てるようにハンドルも返す
    fn spawn_build(
        &self,
        context: BuildContext,
        options: &ImageBuildOptions,
    ) -> BuildResult<(ImageBuildResponse, JoinHandle<()>)> {
        let request = BuildRequest::from_options(options)?;

        tracing::debug!(
            "Starting remote build: tag={}, dockerfile={}",
            request.t,
            request.dockerfile
        );

        let (writer, reader) = stream_bridge();
        let session = self.session.clone();
        let task = tokio::spawn(run_remote_build(session, request, context, writer));

        Ok((ImageBuildResponse { body: reader }, task))
    }

    /// ローカルデーモンは存在しない
    pub fn daemon_host(&self) -> String {
        String::new()
    }
}

/// バックグラウンドタスク: リモート呼び出しの結果をパイプへ書き込み、最後に必ず閉じる
async fn run_remote_build(
    session: RegistrySession,
    request: BuildRequest,
    context: BuildContext,
    mut writer: BridgeWriter,
) {
    let result = session
        .builds
        .image_build(&request, context, &session.build_target_header, &mut writer)
        .await;

    if let Err(e) = result {
        tracing::debug!("Remote build failed: {}", e);
        if let Err(write_err) = writer.write_error_frame(&e.to_string()).await {
            // 読み手がいなくなった後の失敗はユーザーに見せない
            tracing::debug!("Failed to deliver build error to the reader: {}", write_err);
        }
    }

    if let Err(e) = writer.close().await {
        tracing::debug!("Failed to close build output stream: {}", e);
    }
}
