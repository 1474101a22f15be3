//! HLS playlist parsing into the player model.
//!
//! Tag grammar is handled by `m3u8-rs`; this module maps its output onto
//! [`LevelDetails`], [`Fragment`] and [`MediaTrack`] and derives the timing
//! fields the controllers rely on.

use m3u8_rs::{
    AlternativeMedia, AlternativeMediaType, KeyMethod, MediaPlaylistType, MediaSegment,
    VariantStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    HlsError, HlsResult,
    model::{
        ByteRange, EncryptionMethod, Fragment, FragmentSn, LevelDetails, LevelKey, LevelType,
        MediaTrack, PlaylistType, TrackKind, parse_iv,
    },
};

const VIDEO_CODECS: &[&str] = &[
    "avc1", "avc3", "hvc1", "hev1", "dvh1", "dvhe", "vp08", "vp09", "av01", "mp4v",
];
const AUDIO_CODECS: &[&str] = &[
    "mp4a", "ac-3", "ec-3", "opus", "flac", "mp3", "alac", "fLaC", "Opus",
];

/// Which kind of playlist a response holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaylistKind {
    Master,
    Media,
}

/// Owner of a media playlist: fragments get stamped with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaylistTarget {
    pub kind: LevelType,
    pub level: usize,
    pub url_id: usize,
}

impl PlaylistTarget {
    pub fn main(level: usize, url_id: usize) -> Self {
        Self {
            kind: LevelType::Main,
            level,
            url_id,
        }
    }
}

/// One `#EXT-X-STREAM-INF` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedVariant {
    pub url: Url,
    /// AVERAGE-BANDWIDTH when present, else BANDWIDTH.
    pub bitrate: u64,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub name: Option<String>,
    pub codecs: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// Codec strings that are neither known audio nor video.
    pub unknown_codecs: Vec<String>,
    pub audio_group: Option<String>,
    pub text_group: Option<String>,
}

/// Parsed master playlist.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedManifest {
    pub variants: Vec<ParsedVariant>,
    pub audio_tracks: Vec<MediaTrack>,
    pub subtitle_tracks: Vec<MediaTrack>,
}

fn parse_error(e: impl std::fmt::Display) -> HlsError {
    HlsError::PlaylistParse(e.to_string())
}

/// Decide between master and media playlist.
///
/// # Errors
///
/// [`HlsError::PlaylistParse`] when the payload is not an M3U8 playlist.
pub fn classify(data: &[u8]) -> HlsResult<PlaylistKind> {
    let text = std::str::from_utf8(data).map_err(parse_error)?;
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if !text.starts_with("#EXTM3U") {
        return Err(HlsError::PlaylistParse("no EXTM3U delimiter".into()));
    }
    if text.contains("#EXTINF:") || text.contains("#EXT-X-TARGETDURATION:") {
        Ok(PlaylistKind::Media)
    } else {
        Ok(PlaylistKind::Master)
    }
}

/// Split a CODECS attribute into `(video, audio, unknown)`.
pub fn split_codecs(codecs: &str) -> (Option<String>, Option<String>, Vec<String>) {
    let mut video = Vec::new();
    let mut audio = Vec::new();
    let mut unknown = Vec::new();
    for codec in codecs.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let prefix = codec.split('.').next().unwrap_or(codec);
        if VIDEO_CODECS.contains(&prefix) {
            video.push(codec);
        } else if AUDIO_CODECS.contains(&prefix) {
            audio.push(codec);
        } else {
            unknown.push(codec.to_string());
        }
    }
    let join = |list: Vec<&str>| (!list.is_empty()).then(|| list.join(","));
    (join(video), join(audio), unknown)
}

/// Parses a master playlist.
///
/// # Errors
///
/// Fails on invalid UTF-8, tag grammar errors or unresolvable URIs.
pub fn parse_master_playlist(data: &[u8], base: &Url) -> HlsResult<ParsedManifest> {
    let text = std::str::from_utf8(data).map_err(parse_error)?;
    let master = m3u8_rs::parse_master_playlist_res(data)
        .map_err(|e| HlsError::PlaylistParse(format!("{e:?}")))?;

    let names = stream_inf_names(text);
    let mut variants = Vec::new();
    for (index, variant) in master.variants.iter().filter(|v| !v.is_i_frame).enumerate() {
        let name = names.get(index).cloned().flatten();
        variants.push(map_variant(variant, base, name)?);
    }

    let audio_groups: Vec<(Option<&str>, Option<&str>)> = variants
        .iter()
        .map(|v| (v.audio_group.as_deref(), v.audio_codec.as_deref()))
        .collect();

    let mut audio_tracks = Vec::new();
    let mut subtitle_tracks = Vec::new();
    for media in &master.alternatives {
        match media.media_type {
            AlternativeMediaType::Audio => {
                let mut track = map_media(media, TrackKind::Audio, audio_tracks.len(), base)?;
                track.audio_codec = audio_groups
                    .iter()
                    .find(|(group, _)| *group == Some(media.group_id.as_str()))
                    .and_then(|(_, codec)| codec.map(str::to_string));
                audio_tracks.push(track);
            }
            AlternativeMediaType::Subtitles => {
                let track = map_media(media, TrackKind::Subtitles, subtitle_tracks.len(), base)?;
                subtitle_tracks.push(track);
            }
            _ => {}
        }
    }

    debug!(
        variants = variants.len(),
        audio = audio_tracks.len(),
        subtitles = subtitle_tracks.len(),
        "parsed master playlist"
    );
    Ok(ParsedManifest {
        variants,
        audio_tracks,
        subtitle_tracks,
    })
}

fn map_variant(vs: &VariantStream, base: &Url, name: Option<String>) -> HlsResult<ParsedVariant> {
    let (video_codec, audio_codec, unknown_codecs) = vs
        .codecs
        .as_deref()
        .map(split_codecs)
        .unwrap_or_default();
    Ok(ParsedVariant {
        url: base.join(&vs.uri)?,
        bitrate: vs.average_bandwidth.unwrap_or(vs.bandwidth),
        width: vs.resolution.as_ref().map(|r| r.width),
        height: vs.resolution.as_ref().map(|r| r.height),
        name,
        codecs: vs.codecs.clone(),
        video_codec,
        audio_codec,
        unknown_codecs,
        audio_group: vs.audio.clone(),
        text_group: vs.subtitles.clone(),
    })
}

fn map_media(media: &AlternativeMedia, kind: TrackKind, id: usize, base: &Url) -> HlsResult<MediaTrack> {
    let url = media.uri.as_deref().map(|u| base.join(u)).transpose()?;
    Ok(MediaTrack {
        id,
        group_id: media.group_id.clone(),
        name: media.name.clone(),
        kind,
        default: media.default,
        autoselect: media.autoselect,
        forced: media.forced,
        lang: media.language.clone(),
        url,
        audio_codec: None,
        details: None,
    })
}

/// `NAME` attribute of every `#EXT-X-STREAM-INF`, in order.
fn stream_inf_names(text: &str) -> Vec<Option<String>> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("#EXT-X-STREAM-INF:"))
        .map(|attrs| attribute(attrs, "NAME"))
        .collect()
}

/// Value of `key` in an attribute list, quotes removed.
fn attribute(attrs: &str, key: &str) -> Option<String> {
    let mut in_quotes = false;
    let mut start = 0;
    let mut parts = Vec::new();
    for (idx, ch) in attrs.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&attrs[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&attrs[start..]);
    parts.into_iter().find_map(|part| {
        let (k, v) = part.split_once('=')?;
        k.trim().eq_ignore_ascii_case(key).then(|| {
            let v = v.trim();
            v.strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v)
                .to_string()
        })
    })
}

/// Parses a media playlist.
///
/// # Errors
///
/// Fails on invalid UTF-8, tag grammar errors or unresolvable URIs.
pub fn parse_media_playlist(
    data: &[u8],
    base: &Url,
    target: PlaylistTarget,
) -> HlsResult<LevelDetails> {
    let playlist = m3u8_rs::parse_media_playlist_res(data)
        .map_err(|e| HlsError::PlaylistParse(format!("{e:?}")))?;

    let mut details = LevelDetails::new(base.clone());
    #[expect(clippy::cast_precision_loss)]
    let target_duration = playlist.target_duration as f64;
    details.target_duration = target_duration;
    details.version = playlist.version;
    details.live = !playlist.end_list;
    details.playlist_type = match &playlist.playlist_type {
        Some(MediaPlaylistType::Vod) => Some(PlaylistType::Vod),
        Some(MediaPlaylistType::Event) => Some(PlaylistType::Event),
        _ => None,
    };
    details.start_time_offset = playlist.start.as_ref().map(|s| s.time_offset);
    details.start_sn = playlist.media_sequence;
    details.end_sn = playlist.media_sequence;

    let mut sn = playlist.media_sequence;
    let mut cc = playlist.discontinuity_sequence;
    let mut total = 0.0;
    let mut key: Option<LevelKey> = None;
    let mut prev_range_end: Option<u64> = None;
    let mut first_pdt_index: Option<usize> = None;

    if let Some(map) = playlist_level_map(&playlist.unknown_tags) {
        details.init_segment = Some(init_fragment(base, &map.0, map.1, target)?);
    }

    for segment in &playlist.segments {
        if segment.discontinuity {
            cc += 1;
        }
        if let Some(tag) = &segment.key {
            key = map_key(tag, base)?;
        } else if clears_key(&segment.unknown_tags) {
            key = None;
        }
        if let Some(map) = &segment.map {
            let range = map
                .byte_range
                .as_ref()
                .map(|r| ByteRange::from_length(r.length, r.offset.unwrap_or(0)));
            details.init_segment = Some(init_fragment(base, &map.uri, range, target)?);
        }

        let mut frag = Fragment::new(target.kind, FragmentSn::Media(sn), base.join(&segment.uri)?);
        frag.level = target.level;
        frag.url_id = target.url_id;
        frag.cc = cc;
        frag.duration = f64::from(segment.duration);
        frag.start = total;
        frag.title = segment.title.clone().filter(|t| !t.is_empty());
        frag.byte_range = segment.byte_range.as_ref().map(|r| {
            ByteRange::from_length(r.length, r.offset.or(prev_range_end).unwrap_or(0))
        });
        prev_range_end = frag.byte_range.map(|r| r.end);
        frag.decrypt = key.clone().map(|k| {
            let iv = k.iv_for(sn);
            k.with_iv(iv)
        });
        apply_program_date_time(&mut frag, segment, details.fragments.last());
        if frag.raw_program_date_time && first_pdt_index.is_none() {
            first_pdt_index = Some(details.fragments.len());
        }

        total += frag.duration;
        sn += 1;
        details.fragments.push(frag);
    }

    if let Some(index) = first_pdt_index {
        backfill_program_date_times(&mut details.fragments, index);
    }

    if details.init_segment.is_none()
        && !details.fragments.is_empty()
        && details.fragments.iter().all(|f| is_mp4_url(&f.url))
    {
        warn!("MP4 fragments found but no init segment, trying to fetch SIDX");
        let first_url = details.fragments[0].url.clone();
        details.init_segment = Some(init_fragment(base, first_url.as_str(), None, target)?);
        details.needs_sidx_ranges = true;
    }

    details.refresh_derived();
    debug!(
        level = target.level,
        kind = target.kind.as_str(),
        start_sn = details.start_sn,
        end_sn = details.end_sn,
        live = details.live,
        "parsed media playlist"
    );
    Ok(details)
}

fn init_fragment(
    base: &Url,
    uri: &str,
    range: Option<ByteRange>,
    target: PlaylistTarget,
) -> HlsResult<Fragment> {
    let mut frag = Fragment::new(target.kind, FragmentSn::Init, base.join(uri)?);
    frag.level = target.level;
    frag.url_id = target.url_id;
    frag.byte_range = range;
    Ok(frag)
}

/// `#EXT-X-MAP` placed before the first segment may be reported as an unknown tag.
fn playlist_level_map(tags: &[m3u8_rs::ExtTag]) -> Option<(String, Option<ByteRange>)> {
    let rest = tags.iter().rev().find(|t| t.tag == "X-MAP")?.rest.as_deref()?;
    let uri = attribute(rest, "URI")?;
    let range = attribute(rest, "BYTERANGE").and_then(|value| {
        let (length, offset) = value.split_once('@').unwrap_or((value.as_str(), "0"));
        Some(ByteRange::from_length(
            length.trim().parse().ok()?,
            offset.trim().parse().ok()?,
        ))
    });
    Some((uri, range))
}

/// `METHOD=NONE` carries no URI, so m3u8-rs leaves it among the unknown tags.
fn clears_key(tags: &[m3u8_rs::ExtTag]) -> bool {
    tags.iter()
        .filter(|t| t.tag == "X-KEY")
        .filter_map(|t| t.rest.as_deref())
        .filter_map(|rest| attribute(rest, "METHOD"))
        .any(|method| method.eq_ignore_ascii_case("NONE"))
}

fn map_key(tag: &m3u8_rs::Key, base: &Url) -> HlsResult<Option<LevelKey>> {
    let method = match &tag.method {
        KeyMethod::None => return Ok(None),
        KeyMethod::AES128 => EncryptionMethod::Aes128,
        KeyMethod::SampleAES => EncryptionMethod::SampleAes,
        KeyMethod::Other(m) if m.eq_ignore_ascii_case("SAMPLE-AES-CENC") => {
            EncryptionMethod::SampleAesCenc
        }
        KeyMethod::Other(m) => {
            warn!(method = %m, "unsupported key method");
            return Ok(None);
        }
    };
    let uri = tag.uri.as_deref().map(|u| base.join(u)).transpose()?;
    let mut key = LevelKey::new(method, uri);
    key.iv = tag.iv.as_deref().and_then(parse_iv);
    key.key_format = tag.keyformat.clone();
    Ok(Some(key))
}

fn apply_program_date_time(frag: &mut Fragment, segment: &MediaSegment, prev: Option<&Fragment>) {
    if let Some(pdt) = segment.program_date_time {
        #[expect(clippy::cast_precision_loss)]
        let ms = pdt.timestamp_millis() as f64;
        frag.program_date_time = Some(ms);
        frag.raw_program_date_time = true;
    } else if let Some(prev) = prev {
        frag.program_date_time = prev.end_program_date_time();
    }
}

fn backfill_program_date_times(fragments: &mut [Fragment], first_pdt_index: usize) {
    for i in (0..first_pdt_index).rev() {
        let Some(next_pdt) = fragments.get(i + 1).and_then(|f| f.program_date_time) else {
            return;
        };
        fragments[i].program_date_time = Some(next_pdt - fragments[i].duration * 1000.0);
    }
}

fn is_mp4_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.ends_with(".mp4") || path.ends_with(".m4s")
}
