#![forbid(unsafe_code)]

//! HLS playlist state machine and adaptive bitrate control loop.
//!
//! [`Hls`] is the synchronous player core: it parses the multivariant and
//! media playlists, merges live reloads, schedules fragment loads, picks the
//! quality level through [`lyra_abr`], appends demuxed media through an
//! injected [`MediaSink`] and recovers from load failures. It issues I/O as
//! [`LoadRequest`]s; [`Driver`] runs them on tokio over a [`lyra_net::Net`]
//! transport.
//!
//! ## Example
//!
//! ```no_run
//! use lyra_hls::{Driver, Hls, HlsConfig};
//! use lyra_net::{HttpClient, NetOptions};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! # async fn play() -> Result<(), Box<dyn std::error::Error>> {
//! let net = HttpClient::new(NetOptions::default())?;
//! let mut driver = Driver::new(Hls::builder(HlsConfig::default()), net);
//! driver
//!     .hls_mut()
//!     .load_source(Url::parse("https://cdn.example.com/master.m3u8")?);
//! driver.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod config;
mod controller;
mod driver;
mod error;
mod events;
mod fragment_finders;
mod fragment_tracker;
mod hub;
mod level_helper;
mod loader;
mod media;
mod model;
mod parsing;
mod player;
mod session;

pub use buffer::{BufferInfo, TimeRange, TimeRanges, buffer_info};
pub use config::{AbrOptions, HlsConfig, LoadPolicy, StartLevel};
pub use driver::Driver;
pub use error::{ErrorData, ErrorDetails, ErrorKind, HlsError, HlsResult};
pub use fragment_finders::{find_fragment_by_pdt, find_fragment_by_pts};
pub use fragment_tracker::{FragmentState, FragmentTracker};
pub use level_helper::{
    PtsRange, compute_reload_interval, merge_details, merge_subtitle_playlists, update_frag_pts_dts,
};
pub use loader::{
    LoadOutcome, LoadRequest, LoadStats, Loader, PlaylistContext, PlaylistContextKind, RequestId,
    ResponseKind,
};
pub use media::{
    AllCodecs, AppendData, CodecKind, CodecSupport, DemuxContext, DemuxOutput, DemuxedTrack,
    Demuxer, Media, MediaSink, NominalTimingDemuxer, PlaybackQuality, ReadyState, SinkError,
};
pub use model::{
    ByteRange, ElementaryStreams, EncryptionMethod, Fragment, FragmentKey, FragmentSn, Ladder,
    Level, LevelDetails, LevelKey, LevelType, MediaTrack, PlaylistType, StreamType, TrackKind,
};
pub use parsing::{
    ParsedManifest, ParsedVariant, PlaylistKind, PlaylistTarget, classify, parse_master_playlist,
    parse_media_playlist,
};
pub use player::{Hls, HlsBuilder};
