//! Producer thread: polls the sensor and feeds the shared store and the swipe detector

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::SourceError;
use crate::gesture::GestureDetector;
use crate::sensor::{FrameSource, SensorEvent};
use crate::store::SharedStore;

/// Handle to the running sensor thread. Stops and joins on drop.
pub struct Acquisition {
    started: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Acquisition {
    /// Open `source` and start polling it on a dedicated thread.
    ///
    /// If the connection cannot be opened no thread is started and the error
    /// is returned; the render side keeps showing whatever the store holds.
    pub fn start<S>(
        mut source: S,
        store: Arc<SharedStore>,
        detector: GestureDetector,
        poll_timeout: Duration,
    ) -> Result<Self, SourceError>
    where
        S: FrameSource + Send + 'static,
    {
        source.open()?;

        let started = Arc::new(AtomicBool::new(true));
        let running = started.clone();
        let handle = thread::Builder::new()
            .name("sensor-poll".to_string())
            .spawn(move || poll_loop(source, &store, detector, &running, poll_timeout))
            .map_err(|e| SourceError::Connection(format!("failed to spawn poll thread: {e}")))?;

        log::info!("Sensor acquisition started");
        Ok(Self {
            started,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the poll loop to exit and wait for it. Blocks for at most one poll timeout.
    pub fn stop(&mut self) {
        self.started.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Sensor thread panicked");
            } else {
                log::info!("Sensor acquisition stopped");
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop<S: FrameSource>(
    mut source: S,
    store: &SharedStore,
    mut detector: GestureDetector,
    started: &AtomicBool,
    poll_timeout: Duration,
) {
    while started.load(Ordering::Acquire) {
        match source.poll(poll_timeout) {
            Ok(Some(event)) => handle_event(event, store, &mut detector),
            Ok(None) => {}
            Err(e) => {
                log::warn!("{}", e);
                // Keep a failing device from spinning the thread
                thread::sleep(poll_timeout.min(Duration::from_millis(100)));
            }
        }
    }
    source.close();
}

/// Route one sensor event. Images go through the swipe detector before the store.
pub fn handle_event(event: SensorEvent, store: &SharedStore, detector: &mut GestureDetector) {
    match event {
        SensorEvent::Image(image) => {
            let pixels = image.pixels();
            let needed = image.width as usize * image.height as usize;
            if needed == 0 || pixels.len() < needed {
                log::warn!(
                    "Ignoring {}x{} image with {} bytes after offset {}",
                    image.width,
                    image.height,
                    pixels.len(),
                    image.offset
                );
                return;
            }
            detector.observe_frame(image.width, image.height, pixels);
            store.set_frame(image.width, image.height, pixels);
        }
        SensorEvent::Distortion(map) => {
            let grid = store.distortion_grid();
            if map.len() == grid * grid * 2 {
                store.set_distortion_map(&map);
                log::info!("Distortion map updated ({}x{})", grid, grid);
            } else {
                log::warn!(
                    "Ignoring distortion map with {} floats, expected {}",
                    map.len(),
                    grid * grid * 2
                );
            }
        }
        SensorEvent::Log { timestamp, message } => log::info!("[{}] {}", timestamp, message),
        SensorEvent::ConnectionLost => log::warn!("Sensor connection lost"),
    }
}
