//! Byte Transports
//!
//! Serial ports are opened 8-N-1 through `tokio-serial`. The reader loop is
//! generic over any `AsyncRead`, so tests and alternative links can stand in
//! for the port.

use crate::error::WblError;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bytes requested per read
pub const READ_BUFFER_SIZE: usize = 256;

/// Serial port parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    /// Upper bound for a single read
    pub read_timeout: Duration,
}

/// Open a serial port for exclusive use by one provider
pub fn open_serial(settings: &SerialSettings) -> Result<SerialStream, WblError> {
    info!(
        "Opening {} at {} baud (8-N-1)",
        settings.device, settings.baud_rate
    );
    let port = tokio_serial::new(&settings.device, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(settings.read_timeout)
        .open_native_async()?;
    Ok(port)
}

/// Read until cancelled or the transport fails.
///
/// Every read is bounded by `read_timeout` and raced against `cancel`, so
/// cancellation preempts a read in flight. An elapsed read just loops.
/// End of stream counts as a failure: the device went away.
pub async fn read_loop<R, F>(
    mut reader: R,
    read_timeout: Duration,
    cancel: CancellationToken,
    mut on_bytes: F,
) -> Result<(), WblError>
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]),
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("reader cancelled");
                return Ok(());
            }
            read = tokio::time::timeout(read_timeout, reader.read(&mut buf)) => read,
        };

        match read {
            Err(_elapsed) => continue,
            Ok(Ok(0)) => {
                return Err(WblError::Io("transport closed".to_string()));
            }
            Ok(Ok(n)) => on_bytes(&buf[..n]),
            Ok(Err(ref e)) if e.kind() == io::ErrorKind::TimedOut => continue,
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_loop_delivers_and_cancels() {
        let (mut device, host) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let task = tokio::spawn(read_loop(
            host,
            Duration::from_millis(5),
            cancel.clone(),
            move |bytes: &[u8]| {
                let _ = tx.send(bytes.to_vec());
            },
        ));

        device.write_all(&[1, 2, 3]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![1, 2, 3]);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_loop_eof_is_fatal() {
        let (device, host) = tokio::io::duplex(64);
        drop(device);
        let result = read_loop(host, Duration::from_millis(5), CancellationToken::new(), |_| {}).await;
        assert!(matches!(result, Err(WblError::Io(_))));
    }

    #[tokio::test]
    async fn test_idle_reader_keeps_waiting() {
        let (_device, host) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_loop(host, Duration::from_millis(2), cancel.clone(), |_| {}));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let settings = SerialSettings {
            device: "/dev/does-not-exist-wbl".into(),
            baud_rate: 9600,
            read_timeout: Duration::from_millis(20),
        };
        assert!(matches!(open_serial(&settings), Err(WblError::Serial(_))));
    }
}
