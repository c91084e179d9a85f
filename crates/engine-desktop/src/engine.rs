// Desktop media engine: symphonia decode + cpal output
// Supports Windows, macOS, and Linux
//
// Every source is decoded on a loader thread; readiness arrives as
// `EngineEvent::Ready` and `duration_ms()` stays `None` until then.

use crate::decoder::{decode_bytes, decode_file, PcmTrack};
use crate::fetch::{url_extension, HttpFetcher, DEFAULT_HTTP_RETRIES};
use crate::output::{OutputHandle, Transport};
use crate::resample;
use audiofile_core::{
    AudioError, EngineEvent, EngineEventSink, EngineFactory, MediaEngine, MediaSource, Result,
    SessionOptions,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Output slot shared with a remote loader thread
type OutputSlot = Arc<Mutex<Option<OutputHandle>>>;

pub struct DesktopEngine {
    transport: Arc<Transport>,
    output: OutputSlot,
    /// Set on release; a loader still running discards its result
    cancelled: Arc<AtomicBool>,
    events: EngineEventSink,
    released: bool,
}

impl DesktopEngine {
    fn new(events: EngineEventSink, options: &SessionOptions) -> Self {
        Self {
            transport: Transport::new(options.looping),
            output: Arc::new(Mutex::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
            events,
            released: false,
        }
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.released {
            return Err(AudioError::InvalidState("engine released".to_string()));
        }
        if self.transport.duration_ms().is_none() {
            return Err(AudioError::InvalidState("audio not loaded yet".to_string()));
        }
        Ok(())
    }
}

/// Open the output device, convert `track` to its format and install it.
fn prepare(
    track: PcmTrack,
    transport: &Arc<Transport>,
    events: &EngineEventSink,
) -> Result<OutputHandle> {
    let duration_ms = track.duration_ms();
    let output = OutputHandle::spawn(transport.clone(), events.clone())?;
    let converted = resample::adapt(track, output.spec());
    transport.load(converted, duration_ms);
    Ok(output)
}

impl MediaEngine for DesktopEngine {
    fn play(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.transport.with(|state| {
            // Restart a track that already ran out
            if state.is_at_end() {
                state.seek_ms(0);
            }
        });
        self.transport.set_playing(true);
        log::debug!("[{}] playback started", self.events.key().audio_id);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.transport.set_playing(false);
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.ensure_loaded()?;
        self.transport.with(|state| state.seek_ms(position_ms));
        // Seeking in decoded PCM is immediate
        self.events.emit(EngineEvent::SeekCompleted);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        if self.released {
            return Err(AudioError::InvalidState("engine released".to_string()));
        }
        self.transport.set_volume(volume.clamp(0.0, 1.0));
        Ok(())
    }

    fn current_position_ms(&self) -> Result<u64> {
        self.ensure_loaded()?;
        Ok(self.transport.with(|state| state.position_ms()))
    }

    fn duration_ms(&self) -> Option<u64> {
        self.transport.duration_ms()
    }

    fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.cancelled.store(true, Ordering::SeqCst);
        self.transport.clear();
        if let Some(mut output) = self.output.lock().take() {
            output.stop();
        }
        log::debug!("[{}] desktop engine released", self.events.key().audio_id);
    }
}

impl Drop for DesktopEngine {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens desktop engines for new sessions
#[derive(Clone)]
pub struct DesktopEngineFactory {
    fetcher: HttpFetcher,
}

impl DesktopEngineFactory {
    pub fn new() -> Self {
        Self {
            fetcher: HttpFetcher::new(DEFAULT_HTTP_RETRIES),
        }
    }

    pub fn with_http_retries(mut self, retries: u32) -> Self {
        self.fetcher = HttpFetcher::new(retries);
        self
    }

    pub fn with_fetcher(mut self, fetcher: HttpFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Decode (and for URLs, download) `source` off the control thread, then
    /// open the output and post `Ready` or `LoadFailed`.
    fn spawn_loader(
        &self,
        source: MediaSource,
        engine: &DesktopEngine,
    ) -> Result<JoinHandle<()>> {
        let fetcher = self.fetcher.clone();
        let transport = engine.transport.clone();
        let slot = engine.output.clone();
        let cancelled = engine.cancelled.clone();
        let events = engine.events.clone();
        let name = format!("audiofile-loader-{}", events.key().audio_id);

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let loaded = read_source(source, &fetcher, &cancelled).and_then(|track| {
                    if cancelled.load(Ordering::SeqCst) {
                        return Err(AudioError::LoadError("load cancelled".to_string()));
                    }
                    let duration_ms = track.duration_ms();
                    prepare(track, &transport, &events).map(|output| (output, duration_ms))
                });

                match loaded {
                    Ok((output, duration_ms)) => {
                        let mut slot = slot.lock();
                        // Checked under the slot lock so release cannot miss the output
                        if cancelled.load(Ordering::SeqCst) {
                            drop(slot);
                            drop(output);
                            log::debug!("[{}] load finished after release", events.key().audio_id);
                            return;
                        }
                        *slot = Some(output);
                        drop(slot);
                        events.emit(EngineEvent::Ready { duration_ms });
                    }
                    Err(e) => {
                        if cancelled.load(Ordering::SeqCst) {
                            log::debug!("[{}] load abandoned: {}", events.key().audio_id, e);
                            return;
                        }
                        log::error!("[{}] load failed: {}", events.key().audio_id, e);
                        events.emit(EngineEvent::LoadFailed {
                            message: e.to_string(),
                        });
                    }
                }
            })
            .map_err(|e| AudioError::ThreadError(format!("Failed to spawn loader thread: {}", e)))
    }
}

fn read_source(
    source: MediaSource,
    fetcher: &HttpFetcher,
    cancelled: &AtomicBool,
) -> Result<PcmTrack> {
    match source {
        MediaSource::File(path) => decode_file(&path),
        MediaSource::Bytes(bytes) => decode_bytes(bytes, None),
        MediaSource::Url(url) => fetcher
            .fetch(&url, cancelled)
            .and_then(|bytes| decode_bytes(bytes, url_extension(&url))),
    }
}

/// Cheap checks done before a loader is spawned, so obvious mistakes fail
/// the load call itself.
fn check_source(source: &MediaSource) -> Result<()> {
    match source {
        MediaSource::File(path) if !path.is_file() => Err(AudioError::LoadError(format!(
            "Failed to open {}: not a file",
            path.display()
        ))),
        MediaSource::Bytes(bytes) if bytes.is_empty() => {
            Err(AudioError::LoadError("empty audio buffer".to_string()))
        }
        _ => Ok(()),
    }
}

impl Default for DesktopEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for DesktopEngineFactory {
    fn open(
        &mut self,
        source: MediaSource,
        options: &SessionOptions,
        events: EngineEventSink,
    ) -> Result<Box<dyn MediaEngine>> {
        if options.play_in_background {
            log::debug!(
                "[{}] background playback is the default on desktop",
                events.key().audio_id
            );
        }

        check_source(&source)?;
        let engine = DesktopEngine::new(events, options);
        self.spawn_loader(source, &engine)?;
        Ok(Box::new(engine))
    }
}
