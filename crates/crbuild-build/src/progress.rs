//! ビルド出力の表示
//!
//! ボディは JSON メッセージの連続（改行区切りとは限らない）。
//! 最後のメッセージがエラーフレームの場合、末尾に改行はありません。

use crate::error::{BuildError, BuildResult};
use bollard::models::BuildInfo;
use bytes::{Buf, BytesMut};
use colored::Colorize;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(image_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message(format!("Building {}...", image_name));

        Self { progress_bar: pb }
    }

    /// 何も描画しない（quiet モード用）
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    /// スピナーを消してから出力する
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.progress_bar.suspend(f)
    }

    pub fn finish_success(&self) {
        self.progress_bar.finish_with_message("Build completed ✓");
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Build failed: {}", error));
    }
}

/// 連結された JSON メッセージを 1 件ずつ取り出すデコーダ
#[derive(Debug, Default)]
pub struct JsonMessageDecoder;

impl Decoder for JsonMessageDecoder {
    type Item = BuildInfo;
    type Error = BuildError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (item, consumed) = {
            let mut messages =
                serde_json::Deserializer::from_slice(&src[..]).into_iter::<BuildInfo>();
            match messages.next() {
                Some(Ok(item)) => (Some(item), messages.byte_offset()),
                // 途中までしか届いていない
                Some(Err(e)) if e.is_eof() => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                // 空白のみ
                None => (None, src.len()),
            }
        };

        src.advance(consumed);
        Ok(item)
    }
}

/// ビルド出力の表示結果
#[derive(Debug, Default)]
pub struct BuildOutput {
    /// aux メッセージで報告されたイメージID
    pub image_id: Option<String>,
}

/// ボディを最後まで読み、メッセージを `out` に表示
///
/// エラーメッセージを受け取った時点で `BuildFailed` を返す。
pub async fn display_build_output<R>(
    body: R,
    out: &mut dyn Write,
    progress: &BuildProgress,
) -> BuildResult<BuildOutput>
where
    R: AsyncRead + Unpin,
{
    let mut messages = FramedRead::new(body, JsonMessageDecoder);
    let mut output = BuildOutput::default();

    while let Some(message) = messages.next().await {
        let message = message?;
        if let Err(e) = handle_build_message(message, out, progress, &mut output) {
            progress.finish_error(&e.to_string());
            return Err(e);
        }
    }

    progress.finish_success();
    Ok(output)
}

fn handle_build_message(
    message: BuildInfo,
    out: &mut dyn Write,
    progress: &BuildProgress,
    output: &mut BuildOutput,
) -> BuildResult<()> {
    if let Some(error_detail) = message.error_detail {
        let error_msg = error_detail
            .message
            .or(message.error)
            .unwrap_or_else(|| "Unknown build error".to_string());
        return Err(BuildError::BuildFailed(error_msg));
    }

    if let Some(error) = message.error {
        return Err(BuildError::BuildFailed(error));
    }

    if let Some(stream) = message.stream {
        // ビルドステップの出力
        if let Some(step) = stream.lines().find(|line| line.starts_with("Step ")) {
            progress.set_message(step);
        }
        progress.suspend(|| write!(out, "{}", stream))?;
    }

    if let Some(status) = message.status {
        let line = match message.progress {
            Some(bar) => format!("{} {}", status, bar),
            None => status,
        };
        progress.suspend(|| writeln!(out, "{}", line.cyan()))?;
    }

    if let Some(id) = message.aux.and_then(|aux| aux.id) {
        output.image_id = Some(id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn render(body: &[u8]) -> (BuildResult<BuildOutput>, String) {
        let mut out = Vec::new();
        let result = display_build_output(
            Cursor::new(body.to_vec()),
            &mut out,
            &BuildProgress::hidden(),
        )
        .await;
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_decoder_handles_unseparated_messages() {
        let mut buf = BytesMut::from(&b"{\"stream\":\"a\"}{\"stream\":\"b\"}\n{\"stre"[..]);
        let mut decoder = JsonMessageDecoder;

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.stream.as_deref(), Some("a"));
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.stream.as_deref(), Some("b"));

        // 不完全なメッセージは次のチャンクを待つ
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"am\":\"c\"}");
        let third = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(third.stream.as_deref(), Some("c"));
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut buf = BytesMut::from(&b"not json"[..]);
        assert!(JsonMessageDecoder.decode(&mut buf).is_err());
    }

    #[tokio::test]
    async fn test_display_stream_and_image_id() {
        let body = b"{\"stream\":\"Step 1/2 : FROM alpine\\n\"}\n\
                     {\"status\":\"Pulling\"}\n\
                     {\"aux\":{\"ID\":\"sha256:abc\"}}\n\
                     {\"stream\":\"Successfully built abc\\n\"}\n";

        let (result, out) = render(body).await;
        let output = result.unwrap();

        assert_eq!(output.image_id.as_deref(), Some("sha256:abc"));
        assert!(out.contains("Step 1/2 : FROM alpine\n"));
        assert!(out.contains("Pulling"));
        assert!(out.contains("Successfully built abc\n"));
    }

    #[tokio::test]
    async fn test_error_frame_without_newline_fails_build() {
        let body = b"{\"stream\":\"Step 1/2\\n\"}\n{\"errorDetail\":{\"message\":\"remote build failed\"}}";

        let (result, out) = render(body).await;

        match result {
            Err(BuildError::BuildFailed(message)) => assert_eq!(message, "remote build failed"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(out, "Step 1/2\n");
    }

    #[tokio::test]
    async fn test_empty_body() {
        let (result, out) = render(b"").await;
        assert!(result.unwrap().image_id.is_none());
        assert!(out.is_empty());
    }
}
