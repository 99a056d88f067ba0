//! # Ultrasonic Sensor Input
//!
//! The level sensor (DS1603L) streams 4-byte frames over a 9600 baud serial
//! line, roughly once a second:
//!
//! ```text
//! 0xFF  high  low  sum      value_mm = high << 8 | low
//!                           sum      = (0xFF + high + low) & 0xFF
//! ```
//!
//! [`FrameDecoder`] turns bytes into [`RawSample`]s. [`Ds1603lSensor`] runs
//! the decoder in a background task on a serial device that was already
//! configured (`stty -F /dev/ttyUSB0 9600 raw`), and the driver polls the
//! latest frame through [`SensorSource::read`] without waiting. Each frame
//! is handed out once, so polling faster than the sensor transmits does not
//! count the same measurement twice.

use crate::{RawSample, SensorStatus};
use log::{info, warn};
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const FRAME_START: u8 = 0xFF;

/// Anything that can produce a reading on demand.
pub trait SensorSource {
    /// Reading as of `now`, or `None` when nothing new arrived since the
    /// previous call. Must not block.
    fn read(&mut self, now: Instant) -> Option<RawSample>;
}

impl<T: SensorSource + ?Sized> SensorSource for Box<T> {
    fn read(&mut self, now: Instant) -> Option<RawSample> {
        (**self).read(now)
    }
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("cannot open sensor device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Byte-at-a-time frame decoder.
///
/// Bytes before a start marker are discarded, so the decoder locks onto the
/// stream no matter where reading began.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    body: [u8; 3],
    filled: usize,
    in_frame: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a sample when a frame completes.
    pub fn push(&mut self, byte: u8) -> Option<RawSample> {
        if !self.in_frame {
            self.in_frame = byte == FRAME_START;
            self.filled = 0;
            return None;
        }

        self.body[self.filled] = byte;
        self.filled += 1;
        if self.filled < self.body.len() {
            return None;
        }

        self.in_frame = false;
        let [high, low, sum] = self.body;
        let expected = FRAME_START.wrapping_add(high).wrapping_add(low);
        Some(RawSample {
            value_mm: u32::from(u16::from_be_bytes([high, low])),
            status: if sum == expected {
                SensorStatus::Valid
            } else {
                SensorStatus::ChecksumFail
            },
        })
    }
}

/// Latest decoded frame and when it arrived.
type Latest = Option<(RawSample, Instant)>;

/// DS1603L attached to a serial device.
pub struct Ds1603lSensor {
    latest: watch::Receiver<Latest>,
    stale_after: Duration,
    /// Arrival time of the last frame returned by `read`
    delivered: Option<Instant>,
    task: JoinHandle<()>,
}

impl Ds1603lSensor {
    /// Open `path` and start decoding frames in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(path: &str, stale_after: Duration) -> Result<Self, SensorError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| SensorError::Open {
                path: path.to_string(),
                source,
            })?;
        info!("DS1603L sensor opened on {}", path);
        Ok(Self::from_reader(file, stale_after))
    }

    /// Decode frames from any async byte stream.
    pub fn from_reader<R>(reader: R, stale_after: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, latest) = watch::channel(None);
        let task = tokio::spawn(read_frames(reader, tx));
        Self {
            latest,
            stale_after,
            delivered: None,
            task,
        }
    }
}

impl SensorSource for Ds1603lSensor {
    fn read(&mut self, now: Instant) -> Option<RawSample> {
        let latest = *self.latest.borrow();
        match latest {
            Some((_, at)) if self.delivered == Some(at) => {
                if now.saturating_duration_since(at) <= self.stale_after {
                    None
                } else {
                    Some(RawSample::missing())
                }
            }
            Some((sample, at)) if now.saturating_duration_since(at) <= self.stale_after => {
                self.delivered = Some(at);
                Some(sample)
            }
            _ => Some(RawSample::missing()),
        }
    }
}

impl Drop for Ds1603lSensor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_frames<R>(mut reader: R, tx: watch::Sender<Latest>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                warn!("Sensor stream closed");
                break;
            }
            Ok(n) => {
                for &byte in &buf[..n] {
                    if let Some(sample) = decoder.push(byte) {
                        tx.send_replace(Some((sample, Instant::now())));
                    }
                }
            }
            Err(e) => {
                warn!("Sensor read failed: {}", e);
                break;
            }
        }
    }
}
