//! Subtitle streamers.
//!
//! A streamer demuxes one stream from a start offset and pushes decoded
//! [`SubtitleEvent`]s into the stream's event channel. Each streamer runs a
//! blocking pump and an async overlap watchdog under its own cancellation
//! token, a child of the stream scope. When a later-started streamer has
//! already covered the bytes an earlier one is about to decode, the earlier
//! one stops itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use dashmap::DashMap;
use ds_core::{Error, Result, StreamerId};
use ds_io::{BoxReadSeek, CancellableReader};
use ds_media::{DemuxerOptions, MkvDemuxer, MkvMetadata};
use ds_subtitle::{SubtitleDecoder, SubtitleEvent, SubtitlePacket};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How often the watchdog compares live streamers.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerState {
    Running,
    /// Reached the end of the segment.
    Completed,
    /// Stopped, cancelled or failed before the end.
    Stopped,
}

/// Shared view of one running streamer.
#[derive(Debug)]
pub struct StreamerHandle {
    id: StreamerId,
    offset: u64,
    cancel: CancellationToken,
    stop_once: Once,
    completed: AtomicBool,
    last_head_pos: Mutex<Option<u64>>,
}

impl StreamerHandle {
    fn new(offset: u64, cancel: CancellationToken) -> Self {
        Self {
            id: StreamerId::new(),
            offset,
            cancel,
            stop_once: Once::new(),
            completed: AtomicBool::new(false),
            last_head_pos: Mutex::new(None),
        }
    }

    pub fn id(&self) -> StreamerId {
        self.id
    }

    /// Requested start offset (before cluster resynchronisation).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Cluster offset of the last event handed to the channel.
    pub fn last_head_pos(&self) -> Option<u64> {
        *self.last_head_pos.lock()
    }

    pub fn state(&self) -> StreamerState {
        if self.completed.load(Ordering::Acquire) {
            StreamerState::Completed
        } else if self.cancel.is_cancelled() {
            StreamerState::Stopped
        } else {
            StreamerState::Running
        }
    }

    /// Cancel the pump and the watchdog. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop_once.call_once(|| {
            trace!(streamer_id = %self.id, "Stopping subtitle streamer");
            self.cancel.cancel();
        });
    }
}

/// A streamer that is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedStreamer {
    pub offset: u64,
    pub completed: bool,
}

/// Live and finished streamers of one stream.
#[derive(Debug, Default)]
pub struct StreamerRegistry {
    live: DashMap<StreamerId, Arc<StreamerHandle>>,
    finished: Mutex<Vec<FinishedStreamer>>,
}

impl StreamerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: StreamerId) -> Option<Arc<StreamerHandle>> {
        self.live.get(&id).map(|h| h.value().clone())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Start offsets of the live streamers, ascending.
    pub fn live_offsets(&self) -> Vec<u64> {
        let mut offsets: Vec<u64> = self.live.iter().map(|h| h.offset).collect();
        offsets.sort_unstable();
        offsets
    }

    pub fn history(&self) -> Vec<FinishedStreamer> {
        self.finished.lock().clone()
    }

    /// True when a streamer from at or before `offset` already ran to the end.
    pub fn is_fulfilled(&self, offset: u64) -> bool {
        self.finished
            .lock()
            .iter()
            .any(|f| f.completed && f.offset <= offset)
            || self
                .live
                .iter()
                .any(|h| h.offset <= offset && h.state() == StreamerState::Completed)
    }

    pub fn has_live_at(&self, offset: u64) -> bool {
        self.live.iter().any(|h| h.offset == offset)
    }

    /// Stop every live streamer and forget them. History is kept.
    pub fn stop_all(&self) {
        for handle in self.live.iter() {
            handle.stop();
        }
        self.live.clear();
    }

    /// Forget everything, including which ranges were already fulfilled.
    pub fn clear(&self) {
        self.stop_all();
        self.finished.lock().clear();
    }

    /// The offset of a later streamer whose start this one has reached.
    ///
    /// Later streamers count while running and once completed; stopped ones
    /// left part of their range undelivered.
    fn overtaken_by(&self, handle: &StreamerHandle) -> Option<u64> {
        let last = handle.last_head_pos()?;
        let reached = |offset: u64| offset > handle.offset && last >= offset;
        let live = self
            .live
            .iter()
            .filter(|other| other.id != handle.id && other.state() != StreamerState::Stopped)
            .map(|other| other.offset)
            .find(|&offset| reached(offset));
        live.or_else(|| {
            self.finished
                .lock()
                .iter()
                .filter(|f| f.completed)
                .map(|f| f.offset)
                .find(|&offset| reached(offset))
        })
    }

    fn finish(&self, handle: &StreamerHandle) {
        if self.live.remove(&handle.id).is_some() {
            self.finished.lock().push(FinishedStreamer {
                offset: handle.offset,
                completed: handle.state() == StreamerState::Completed,
            });
        }
    }
}

/// Where and how a streamer starts.
#[derive(Debug, Clone)]
pub struct StreamerParams {
    pub start_offset: u64,
    pub backoff: u64,
    pub demuxer: DemuxerOptions,
    /// Header parsed earlier; the pump then starts without rereading it.
    pub metadata: Option<Arc<MkvMetadata>>,
}

/// Start a streamer over `reader`, or `None` when the range was already
/// fulfilled by a completed streamer or the scope has ended.
pub fn spawn_streamer(
    registry: &Arc<StreamerRegistry>,
    scope: &CancellationToken,
    reader: BoxReadSeek,
    params: StreamerParams,
    events: mpsc::Sender<SubtitleEvent>,
) -> Option<Arc<StreamerHandle>> {
    if scope.is_cancelled() {
        return None;
    }
    if registry.is_fulfilled(params.start_offset) {
        debug!(offset = params.start_offset, "Subtitle range already fulfilled");
        return None;
    }

    let handle = Arc::new(StreamerHandle::new(params.start_offset, scope.child_token()));
    registry.live.insert(handle.id, handle.clone());
    info!(
        streamer_id = %handle.id,
        offset = params.start_offset,
        backoff = params.backoff,
        "Starting subtitle streamer"
    );

    tokio::spawn(watchdog(registry.clone(), handle.clone()));

    let registry = registry.clone();
    let pump_handle = handle.clone();
    let runtime = Handle::current();
    tokio::spawn(async move {
        let worker = pump_handle.clone();
        let result = tokio::task::spawn_blocking(move || {
            pump(&runtime, &worker, reader, &params, &events)
        })
        .await;
        match result {
            Ok(Ok(())) => {
                pump_handle.completed.store(true, Ordering::Release);
                debug!(streamer_id = %pump_handle.id, "Subtitle streamer completed");
            }
            Ok(Err(e)) if e.is_shutdown() => {
                debug!(streamer_id = %pump_handle.id, "Subtitle streamer stopped");
            }
            Ok(Err(Error::NoCluster { offset })) => {
                debug!(streamer_id = %pump_handle.id, offset, "No cluster after offset");
            }
            Ok(Err(e)) => {
                warn!(streamer_id = %pump_handle.id, error = %e, "Subtitle streamer failed");
            }
            Err(e) => {
                warn!(streamer_id = %pump_handle.id, error = %e, "Subtitle pump panicked");
            }
        }
        registry.finish(&pump_handle);
        pump_handle.stop();
    });

    Some(handle)
}

fn pump(
    runtime: &Handle,
    handle: &StreamerHandle,
    reader: BoxReadSeek,
    params: &StreamerParams,
    events: &mpsc::Sender<SubtitleEvent>,
) -> Result<()> {
    let reader = CancellableReader::new(reader, handle.cancel.clone());
    let known = params
        .metadata
        .as_deref()
        .filter(|metadata| metadata.layout.data_offset > 0);
    let mut demuxer = match known {
        Some(metadata) => MkvDemuxer::resume(reader, metadata, params.demuxer.clone())?,
        None => MkvDemuxer::open(reader, params.demuxer.clone())?,
    };

    let mut decoder = SubtitleDecoder::new(&demuxer.metadata().tracks);
    let tracks: std::collections::HashSet<u64> = decoder.track_numbers().collect();
    if tracks.is_empty() {
        debug!(streamer_id = %handle.id, "No decodable subtitle tracks");
        return Ok(());
    }
    let default_durations: HashMap<u64, u64> = demuxer
        .metadata()
        .tracks
        .iter()
        .map(|t| (t.number, t.default_duration))
        .collect();
    demuxer.set_track_filter(Some(tracks));

    if params.start_offset > 0 {
        let cluster = demuxer.find_next_cluster(params.start_offset, params.backoff)?;
        debug!(
            streamer_id = %handle.id,
            offset = params.start_offset,
            cluster,
            "Resynchronised on cluster"
        );
    }

    while let Some(packet) = demuxer.read_packet()? {
        let duration_ns = match packet.duration_ns() {
            0 => default_durations.get(&packet.track).copied().unwrap_or(0),
            d => d,
        };
        let decoded = decoder.decode(SubtitlePacket {
            track: packet.track,
            data: &packet.data,
            start_ms: packet.start_ns as f64 / 1e6,
            duration_ms: duration_ns as f64 / 1e6,
            head_pos: packet.head_pos,
        });
        match decoded {
            Ok(decoded) => {
                for event in decoded {
                    emit(runtime, handle, events, event)?;
                }
            }
            Err(e) => warn!(track = packet.track, error = %e, "Skipping undecodable subtitle packet"),
        }
    }

    for event in decoder.flush() {
        emit(runtime, handle, events, event)?;
    }
    Ok(())
}

/// Send one event, giving up as soon as the streamer is stopped.
fn emit(
    runtime: &Handle,
    handle: &StreamerHandle,
    events: &mpsc::Sender<SubtitleEvent>,
    event: SubtitleEvent,
) -> Result<()> {
    *handle.last_head_pos.lock() = Some(event.head_pos);
    runtime.block_on(async {
        tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => Err(Error::Cancelled),
            sent = events.send(event) => {
                sent.map_err(|_| Error::Closed("subtitle event channel".into()))
            }
        }
    })
}

async fn watchdog(registry: Arc<StreamerRegistry>, handle: Arc<StreamerHandle>) {
    let mut tick = tokio::time::interval(WATCHDOG_INTERVAL);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Some(later) = registry.overtaken_by(&handle) {
                    info!(
                        streamer_id = %handle.id,
                        offset = handle.offset,
                        overtaken_at = later,
                        "Subtitle streamer reached a later streamer, stopping"
                    );
                    handle.stop();
                    break;
                }
            }
        }
    }
}
