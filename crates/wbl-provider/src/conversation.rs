//! Conversational Driver
//!
//! Some controllers (Stag) only talk when spoken to. The driver owns the
//! write half of the transport: it sends the kickoff, then answers every
//! frame with the command the decoder asked for. Each send is preceded by
//! the pacing delay; the device drops commands that arrive back to back.

use crate::error::WblError;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Silence after which the kickoff is sent again
pub const KICKOFF_RETRY: Duration = Duration::from_secs(2);

/// Capacity of the reply queue between reader and driver
pub const REPLY_QUEUE: usize = 32;

/// Drives the request/response side of a conversational protocol
#[derive(Debug, Clone)]
pub struct Conversation {
    kickoff: Vec<u8>,
    pacing: Duration,
    retry: Duration,
}

impl Conversation {
    pub fn new(kickoff: Vec<u8>, pacing: Duration) -> Self {
        Self {
            kickoff,
            pacing,
            retry: KICKOFF_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Run until cancelled, the reader goes away or a write fails
    pub async fn run<W>(
        &self,
        mut writer: W,
        mut replies: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Result<(), WblError>
    where
        W: AsyncWrite + Unpin,
    {
        info!("conversation: sending kickoff");
        self.send(&mut writer, &self.kickoff, &cancel).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = tokio::time::timeout(self.retry, replies.recv()) => next,
            };

            match next {
                Ok(Some(command)) => self.send(&mut writer, &command, &cancel).await?,
                Ok(None) => {
                    debug!("conversation: reader gone");
                    return Ok(());
                }
                Err(_) => {
                    // no frame for a while: treat as lost and start over
                    debug!("conversation: silent for {:?}, re-sending kickoff", self.retry);
                    self.send(&mut writer, &self.kickoff, &cancel).await?;
                }
            }
        }
    }

    async fn send<W>(&self, writer: &mut W, data: &[u8], cancel: &CancellationToken) -> Result<(), WblError>
    where
        W: AsyncWrite + Unpin,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(self.pacing) => {}
        }
        writer.write_all(data).await?;
        writer.flush().await?;
        debug!("conversation: sent {:02X?}", data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_every_send_is_paced() {
        let (host, mut device) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(REPLY_QUEUE);
        let cancel = CancellationToken::new();
        let driver = Conversation::new(vec![0xAA], Duration::from_millis(100));

        let started = Instant::now();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { driver.run(host, rx, cancel).await }
        });

        tx.send(vec![0x01]).await.unwrap();
        tx.send(vec![0x02]).await.unwrap();

        let mut byte = [0u8; 1];
        let mut stamps = Vec::new();
        for expected in [0xAA, 0x01, 0x02] {
            device.read_exact(&mut byte).await.unwrap();
            assert_eq!(byte[0], expected);
            stamps.push(Instant::now() - started);
        }

        assert!(stamps[0] >= Duration::from_millis(100));
        assert!(stamps[1] - stamps[0] >= Duration::from_millis(100));
        assert!(stamps[2] - stamps[1] >= Duration::from_millis(100));

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kickoff_resent_after_silence() {
        let (host, mut device) = tokio::io::duplex(64);
        let (_tx, rx) = mpsc::channel(REPLY_QUEUE);
        let cancel = CancellationToken::new();
        let driver = Conversation::new(vec![0xAC], Duration::from_millis(10))
            .with_retry(Duration::from_millis(500));

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { driver.run(host, rx, cancel).await }
        });

        let mut buf = [0u8; 2];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xAC, 0xAC]);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_ends_when_reader_is_gone() {
        let (host, _device) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(REPLY_QUEUE);
        drop(tx);
        let driver = Conversation::new(vec![0xAC], Duration::from_millis(1));
        assert!(driver.run(host, rx, CancellationToken::new()).await.is_ok());
    }
}
