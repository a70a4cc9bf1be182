//! Playback sessions and the stream kinds behind them.

mod local;
mod manager;
mod playback;
mod remote;
mod stream;
mod torrent;

pub use local::LocalFile;
pub use manager::{
    LogProgress, ProgressUpdater, SessionManager, LOADING_METADATA, LOADING_STREAM,
};
pub use playback::{stream_url, PlaybackInfo, StreamType, SERVER_URL_PLACEHOLDER};
pub use remote::{RemoteHttp, RemoteProbe};
pub use stream::{Source, Stream, StreamEnv, StreamOptions};
pub use torrent::{MemoryTorrentFile, TorrentFile, TorrentStream};
