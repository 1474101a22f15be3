#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    http::{StatusCode, Uri},
};
use bytes::Bytes;
use lyra_hls::{
    AppendData, LoadOutcome, LoadRequest, LoadStats, Loader, Media, MediaSink, RequestId, SinkError,
    StreamType, TimeRange, TimeRanges,
};
use lyra_platform::{Clock, Instant, ManualClock, Mutex};
use tokio::net::TcpListener;
use url::Url;

pub const BITRATES: [u64; 3] = [500_000, 1_500_000, 3_000_000];

pub fn master_playlist() -> String {
    let mut playlist = String::from("#EXTM3U\n");
    for (i, bitrate) in BITRATES.iter().enumerate() {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={bitrate},CODECS=\"avc1.4d401f,mp4a.40.2\"\nv{i}.m3u8\n"
        ));
    }
    playlist
}

/// Same ladder with a backup URL for the top level.
pub fn redundant_master_playlist() -> String {
    let mut playlist = master_playlist();
    playlist.push_str(&format!(
        "#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"avc1.4d401f,mp4a.40.2\"\nbackup/v2.m3u8\n",
        BITRATES[2]
    ));
    playlist
}

/// VOD playlist of `count` four second segments of `level`.
pub fn media_playlist(level: usize, count: u64) -> String {
    let mut playlist = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for sn in 0..count {
        playlist.push_str(&format!("#EXTINF:4.0,\nseg/{level}/{sn}.ts\n"));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Loader that only records what the player asks for.
#[derive(Clone, Default)]
pub struct RecordingLoader {
    pub loads: Arc<Mutex<Vec<LoadRequest>>>,
    pub aborts: Arc<Mutex<Vec<RequestId>>>,
}

impl RecordingLoader {
    /// Latest request for `path`.
    pub fn find(&self, path: &str) -> Option<LoadRequest> {
        self.loads
            .lock()
            .iter()
            .rev()
            .find(|r| r.url.path() == path)
            .cloned()
    }

    pub fn count(&self, path: &str) -> usize {
        self.loads
            .lock()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }
}

impl Loader for RecordingLoader {
    fn load(&mut self, request: LoadRequest) {
        self.loads.lock().push(request);
    }

    fn abort(&mut self, id: RequestId) {
        self.aborts.lock().push(id);
    }
}

#[derive(Default)]
struct Buffer {
    ranges: HashMap<StreamType, TimeRanges>,
    appended: usize,
    eos: bool,
}

/// In-memory media buffer shared by [`TestMedia`] and [`TestSink`].
#[derive(Clone, Default)]
pub struct TestSink {
    buffer: Arc<Mutex<Buffer>>,
}

impl TestSink {
    pub fn appended(&self) -> usize {
        self.buffer.lock().appended
    }

    pub fn ended(&self) -> bool {
        self.buffer.lock().eos
    }

    pub fn buffered_end(&self) -> f64 {
        let buffer = self.buffer.lock();
        buffer
            .ranges
            .values()
            .filter_map(|r| r.iter().last().map(|range| range.end))
            .fold(0.0, f64::max)
    }
}

impl MediaSink for TestSink {
    fn append(&mut self, data: &AppendData) -> Result<(), SinkError> {
        let mut buffer = self.buffer.lock();
        if data.end > data.start {
            buffer
                .ranges
                .entry(data.stream)
                .or_default()
                .insert(TimeRange::new(data.start, data.end));
        }
        buffer.appended += 1;
        Ok(())
    }

    fn remove(&mut self, stream: StreamType, start: f64, end: f64) -> Result<(), SinkError> {
        if let Some(ranges) = self.buffer.lock().ranges.get_mut(&stream) {
            ranges.remove(start, end);
        }
        Ok(())
    }

    fn buffered(&self, stream: StreamType) -> TimeRanges {
        self.buffer
            .lock()
            .ranges
            .get(&stream)
            .cloned()
            .unwrap_or_default()
    }

    fn end_of_stream(&mut self) {
        self.buffer.lock().eos = true;
    }
}

/// Playback element parked at `position`.
#[derive(Clone, Default)]
pub struct TestMedia {
    pub position: Arc<Mutex<f64>>,
    sink: TestSink,
}

impl TestMedia {
    pub fn new(sink: &TestSink) -> Self {
        Self {
            position: Arc::default(),
            sink: sink.clone(),
        }
    }
}

impl Media for TestMedia {
    fn current_time(&self) -> f64 {
        *self.position.lock()
    }

    fn buffered(&self) -> TimeRanges {
        let buffer = self.sink.buffer.lock();
        let mut all = TimeRanges::new();
        for range in buffer.ranges.values().flat_map(|r| r.iter()) {
            all.insert(*range);
        }
        all
    }
}

/// Successful outcome of a request issued at `trequest`.
pub fn success(clock: &ManualClock, trequest: Instant, body: impl Into<Bytes>) -> LoadOutcome {
    let data = body.into();
    LoadOutcome::Success {
        stats: LoadStats::completed(trequest, clock.now(), data.len() as u64),
        data,
    }
}

/// Local HLS origin serving [`master_playlist`], three level playlists and
/// their segments.
pub struct TestServer {
    pub base_url: Url,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        let app = Router::new().fallback(move |uri: Uri| {
            let seen = Arc::clone(&seen);
            async move {
                let path = uri.path().to_string();
                seen.lock().push(path.clone());
                serve(&path)
            }
        });

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
            requests,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).unwrap()
    }

    pub fn requested(&self, path: &str) -> bool {
        self.requests.lock().iter().any(|p| p == path)
    }
}

fn serve(path: &str) -> (StatusCode, Vec<u8>) {
    if path == "/master.m3u8" {
        return (StatusCode::OK, master_playlist().into_bytes());
    }
    if let Some(level) = path
        .strip_prefix("/v")
        .and_then(|rest| rest.strip_suffix(".m3u8"))
        .and_then(|level| level.parse::<usize>().ok())
    {
        return (StatusCode::OK, media_playlist(level, 3).into_bytes());
    }
    if let Some(level) = path
        .strip_prefix("/seg/")
        .and_then(|rest| rest.split('/').next())
        .and_then(|level| level.parse::<usize>().ok())
    {
        return (StatusCode::OK, vec![0_u8; 4_000 * (level + 1)]);
    }
    (StatusCode::NOT_FOUND, Vec::new())
}
