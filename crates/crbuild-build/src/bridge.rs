//! ストリームブリッジ
//!
//! バックグラウンドのリモート呼び出しと、ビルド出力を読むコンシューマを
//! 1本のバイトパイプでつなぎます。書き込み側・読み込み側はそれぞれ単一の所有者を持ちます。

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

/// パイプ内に保持する最大バイト数
///
/// 小さく保ち、書き込み側がコンシューマより先行しすぎないようにする
const BRIDGE_BUF_SIZE: usize = 8 * 1024;

/// パイプを作成し、(書き込み側, 読み込み側) を返す
pub fn stream_bridge() -> (BridgeWriter, BridgeReader) {
    let (writer, reader) = tokio::io::duplex(BRIDGE_BUF_SIZE);
    (BridgeWriter { inner: writer }, BridgeReader { inner: reader })
}

/// パイプの書き込み側
///
/// `close` は self を消費するため、クローズは必ず1回だけ。
/// `close` せずに drop された場合も読み込み側には EOF が届く。
#[derive(Debug)]
pub struct BridgeWriter {
    inner: DuplexStream,
}

impl BridgeWriter {
    /// `{"errorDetail":{"message":"..."}}` 形式のエラーフレームを書き込む
    pub async fn write_error_frame(&mut self, message: &str) -> io::Result<()> {
        let frame = serde_json::json!({ "errorDetail": { "message": message } });
        let bytes = serde_json::to_vec(&frame)?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await
    }

    /// 書き込み側を閉じる
    ///
    /// それまでに書き込んだバイトはすべて読み込み側から読める
    pub async fn close(mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

impl AsyncWrite for BridgeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// パイプの読み込み側
#[derive(Debug)]
pub struct BridgeReader {
    inner: DuplexStream,
}

impl AsyncRead for BridgeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_bytes_arrive_in_order() {
        let (mut writer, mut reader) = stream_bridge();

        let producer = tokio::spawn(async move {
            for i in 0..100u32 {
                writer.write_all(format!("{i};").as_bytes()).await.unwrap();
            }
            writer.close().await.unwrap();
        });

        let mut output = String::new();
        reader.read_to_string(&mut output).await.unwrap();
        producer.await.unwrap();

        let expected: String = (0..100u32).map(|i| format!("{i};")).collect();
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn test_error_frame_then_eof() {
        let (mut writer, mut reader) = stream_bridge();

        writer.write_error_frame("remote said \"no\"").await.unwrap();
        writer.close().await.unwrap();

        let mut output = String::new();
        reader.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, r#"{"errorDetail":{"message":"remote said \"no\""}}"#);
    }

    #[tokio::test]
    async fn test_drop_writer_signals_eof() {
        let (writer, mut reader) = stream_bridge();
        drop(writer);

        let mut output = Vec::new();
        let read = reader.read_to_end(&mut output).await.unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_write_fails_after_reader_dropped() {
        let (mut writer, reader) = stream_bridge();
        drop(reader);

        let result = writer.write_all(b"orphaned").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reader_waits_until_close() {
        let (mut writer, mut reader) = stream_bridge();
        writer.write_all(b"partial").await.unwrap();

        let mut buf = [0u8; 7];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"partial");

        // クローズ前は EOF にならない
        let mut more = [0u8; 1];
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), reader.read(&mut more))
                .await;
        assert!(pending.is_err());

        writer.close().await.unwrap();
        assert_eq!(reader.read(&mut more).await.unwrap(), 0);
    }
}
