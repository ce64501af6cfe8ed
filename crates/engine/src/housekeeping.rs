//! Threads next to the audio path that do what it may not: write files and log.
use std::{
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam::queue::ArrayQueue;
use graph::Diagnostic;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
pub(crate) struct Housekeeping {
    exit: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Housekeeping {
    fn spawn(&mut self, name: &str, f: impl FnOnce(Arc<AtomicBool>) + Send + 'static) -> bool {
        let exit = self.exit.clone();
        match std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || f(exit))
        {
            Ok(thread) => {
                self.threads.push(thread);
                true
            }
            Err(error) => {
                tracing::warn!("failed to spawn {name}: {error}");
                false
            }
        }
    }

    /// Drain master samples into `writer` as little endian f32, interleaved.
    pub fn spawn_recorder(
        &mut self,
        samples: fifo::Receiver<f32>,
        writer: Box<dyn Write + Send>,
    ) -> bool {
        self.spawn("cadence-recorder", move |exit| {
            record(samples, writer, &exit)
        })
    }

    /// Log real-time diagnostics as they come in.
    pub fn spawn_ui_pump(&mut self, diagnostics: Arc<ArrayQueue<Diagnostic>>) -> bool {
        self.spawn("cadence-ui-pump", move |exit| loop {
            let exiting = exit.load(Ordering::Acquire);
            while let Some(diagnostic) = diagnostics.pop() {
                tracing::warn!("{diagnostic}");
            }
            if exiting {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        })
    }

    /// Stop every thread once it has drained its queue.
    pub fn shutdown(&mut self) {
        self.exit.store(true, Ordering::Release);
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or_default().to_owned();
            if thread.join().is_err() {
                tracing::warn!("{name} panicked");
            }
        }
    }
}

impl Drop for Housekeeping {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn record(mut samples: fifo::Receiver<f32>, mut writer: Box<dyn Write + Send>, exit: &AtomicBool) {
    let mut buffer = vec![0.0f32; 4096];
    let mut bytes = Vec::with_capacity(buffer.len() * size_of::<f32>());
    let mut failed = false;
    let mut written = 0u64;
    loop {
        // Sampled before draining so nothing pushed before shutdown is left behind.
        let exiting = exit.load(Ordering::Acquire);
        let count = samples.pop_into(&mut buffer);
        if count > 0 {
            if failed {
                continue;
            }
            bytes.clear();
            for sample in &buffer[..count] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            match writer.write_all(&bytes) {
                Ok(()) => written += count as u64,
                Err(error) => {
                    tracing::error!("recorder: {error}, discarding the rest of the take");
                    failed = true;
                }
            }
            continue;
        }
        if exiting {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    if let Err(error) = writer.flush() {
        tracing::error!("recorder: {error}");
    }
    tracing::debug!("recorder stopped after {written} samples");
}
