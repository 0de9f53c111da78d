//! Last-write-wins frame distribution.
//!
//! The capture thread publishes into a watch channel; any number of
//! consumers (recognition pipeline, MJPEG stream clients) each hold a
//! cursor that always resolves to the newest frame. Slow consumers skip
//! intermediate frames instead of building a backlog.

use std::sync::Arc;
use tokio::sync::watch;

/// A published frame: raw pixels for recognition plus the JPEG that all
/// stream consumers share, encoded once at capture time.
#[derive(Debug)]
pub struct HubFrame {
    /// Monotonically increasing per-source counter.
    pub sequence: u64,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
    pub jpeg: Vec<u8>,
}

/// Shared handle for publishing and subscribing to the latest frame.
#[derive(Clone)]
pub struct FrameHub {
    tx: Arc<watch::Sender<Option<Arc<HubFrame>>>>,
}

impl FrameHub {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current frame. Never blocks; consumers that have not
    /// yet read the previous frame simply never see it.
    pub fn publish(&self, frame: HubFrame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    pub fn subscribe(&self) -> FrameCursor {
        FrameCursor {
            rx: self.tx.subscribe(),
        }
    }

    /// Snapshot of the most recent frame, if any has been published.
    pub fn latest(&self) -> Option<Arc<HubFrame>> {
        self.tx.borrow().clone()
    }

    pub fn has_frames(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer's view into the hub. Each call to [`FrameCursor::next`]
/// waits for a frame newer than the last one this cursor observed.
pub struct FrameCursor {
    rx: watch::Receiver<Option<Arc<HubFrame>>>,
}

impl FrameCursor {
    /// Wait for the next unseen frame. Returns `None` once every
    /// [`FrameHub`] handle has been dropped.
    pub async fn next(&mut self) -> Option<Arc<HubFrame>> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(sequence: u64) -> HubFrame {
        HubFrame {
            sequence,
            timestamp_ms: sequence as i64 * 33,
            width: 4,
            height: 4,
            rgb: vec![0u8; 4 * 4 * 3],
            jpeg: vec![0xFF, 0xD8],
        }
    }

    #[tokio::test]
    async fn test_latest_and_has_frames() {
        let hub = FrameHub::new();
        assert!(!hub.has_frames());
        assert!(hub.latest().is_none());

        hub.publish(frame(1));
        assert!(hub.has_frames());
        assert_eq!(hub.latest().unwrap().sequence, 1);

        hub.publish(frame(2));
        assert_eq!(hub.latest().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_cursor_sees_newest_only() {
        let hub = FrameHub::new();
        let mut cursor = hub.subscribe();

        hub.publish(frame(1));
        hub.publish(frame(2));
        hub.publish(frame(3));

        // All three published before the cursor woke; only the newest wins.
        let seen = cursor.next().await.unwrap();
        assert_eq!(seen.sequence, 3);
    }

    #[tokio::test]
    async fn test_cursor_sequences_are_monotonic() {
        let hub = FrameHub::new();
        let mut cursor = hub.subscribe();

        let publisher = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for seq in 1..=20 {
                    hub.publish(frame(seq));
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        let mut last = 0u64;
        while last < 20 {
            let f = cursor.next().await.unwrap();
            assert!(f.sequence > last, "went backwards: {} -> {}", last, f.sequence);
            last = f.sequence;
        }

        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_ends_when_hub_dropped() {
        let hub = FrameHub::new();
        let mut cursor = hub.subscribe();
        hub.publish(frame(1));
        assert_eq!(cursor.next().await.unwrap().sequence, 1);

        drop(hub);
        assert!(cursor.next().await.is_none());
    }
}
