//! Event source that replays a fixed script

use super::{DeviceEvent, EventSource, EventStream};
use common::{Error, Result, Shutdown, create_event_bridge};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Replays a list of events (and errors) to the first subscriber
///
/// By default the stream closes after the last item, like a bus that went
/// away. [`ScriptedSource::hold_open`] keeps it open until shutdown instead,
/// like a live bus with nothing more to say.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: Mutex<Vec<Result<DeviceEvent>>>,
    hold_open: bool,
    fail_with: Option<String>,
    subscriptions: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(events: Vec<DeviceEvent>) -> Self {
        Self::with_items(events.into_iter().map(Ok).collect())
    }

    /// Script mixing events and mid-stream errors
    pub fn with_items(items: Vec<Result<DeviceEvent>>) -> Self {
        Self {
            script: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Source whose subscription can never be established
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Number of subscribe calls, successful or not
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl EventSource for ScriptedSource {
    fn subscribe(&self, shutdown: Shutdown) -> Result<EventStream> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_with {
            return Err(Error::Monitor(reason.clone()));
        }

        let items = std::mem::take(&mut *self.script.lock().unwrap_or_else(|e| e.into_inner()));
        let hold_open = self.hold_open;
        let (tx, rx) = create_event_bridge();

        let producer = thread::Builder::new()
            .name("scripted-events".to_string())
            .spawn(move || {
                for item in items {
                    if shutdown.is_triggered() || tx.send_blocking(item).is_err() {
                        return;
                    }
                }
                while hold_open && !shutdown.is_triggered() && !tx.is_closed() {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| Error::Monitor(format!("Failed to spawn producer: {}", e)))?;

        Ok(EventStream::with_producer(rx, producer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::DeviceAction;

    #[tokio::test]
    async fn test_replays_then_closes() {
        let source = ScriptedSource::with_items(vec![
            Ok(DeviceEvent::new("usb", DeviceAction::Add, "/sys/devices/x/1-1")),
            Err(Error::MalformedEvent("truncated".into())),
        ]);
        let mut stream = source.subscribe(Shutdown::new()).unwrap();

        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(matches!(stream.next().await, Some(Err(_))));
        assert!(stream.next().await.is_none());
        assert_eq!(source.subscriptions(), 1);
    }

    #[test]
    fn test_failing_subscription() {
        let source = ScriptedSource::failing("no netlink");
        let err = source.subscribe(Shutdown::new()).unwrap_err();
        assert!(err.to_string().contains("no netlink"));
    }
}
