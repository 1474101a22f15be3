use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;

use super::{
    LoadOutcome, LoadStats, PlaylistContext, PlaylistContextKind, RequestId, ResponseKind,
};
use crate::{
    HlsResult,
    error::{ErrorData, ErrorDetails, ErrorKind},
    events::{Event, EventKind},
    hub::{Component, Context},
    model::LevelType,
    parsing::{
        ParsedManifest, ParsedVariant, PlaylistKind, PlaylistTarget, classify,
        parse_master_playlist, parse_media_playlist,
    },
};

struct InFlight {
    id: RequestId,
    context: PlaylistContext,
}

/// Loads manifests and media playlists, one request per context kind.
#[derive(Default)]
pub struct PlaylistLoader {
    in_flight: HashMap<PlaylistContextKind, InFlight>,
}

impl PlaylistLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&mut self, context: PlaylistContext, cx: &mut Context<'_>) {
        if let Some(current) = self.in_flight.get(&context.kind) {
            if current.context.url == context.url {
                debug!(url = %context.url, "playlist request already in flight");
                return;
            }
            warn!(
                previous = %current.context.url,
                url = %context.url,
                "aborting previous playlist load"
            );
            let id = current.id;
            cx.abort(id);
        }

        let config = &cx.session.config;
        let policy = match context.kind {
            PlaylistContextKind::Manifest => config.manifest,
            // Level failures are recovered by the level controller.
            _ => config.level.without_retry(),
        };
        let id = cx.load(context.url.clone(), ResponseKind::Text, None, policy);
        self.in_flight.insert(context.kind, InFlight { id, context });
    }

    fn on_success(
        &mut self,
        context: PlaylistContext,
        data: &Bytes,
        mut stats: LoadStats,
        cx: &mut Context<'_>,
    ) {
        let kind = match classify(data) {
            Ok(kind) => kind,
            Err(err) => {
                return cx.error(parsing_error(&context, err.to_string()));
            }
        };

        match (kind, context.kind) {
            (PlaylistKind::Master, PlaylistContextKind::Manifest) => {
                match parse_master_playlist(data, &context.url) {
                    Ok(manifest) if manifest.variants.is_empty() => {
                        cx.error(parsing_error(&context, "no level found in manifest"));
                    }
                    Ok(manifest) => {
                        stats.tparsed = Some(cx.now());
                        cx.emit(Event::ManifestLoaded {
                            url: context.url,
                            manifest,
                            details: None,
                            stats,
                        });
                    }
                    Err(err) => cx.error(parsing_error(&context, err.to_string())),
                }
            }
            (PlaylistKind::Master, _) => {
                cx.error(load_error(&context, false, "master playlist where a media playlist was expected"));
            }
            (PlaylistKind::Media, _) => self.on_media_playlist(context, data, stats, cx),
        }
    }

    fn on_media_playlist(
        &mut self,
        context: PlaylistContext,
        data: &Bytes,
        mut stats: LoadStats,
        cx: &mut Context<'_>,
    ) {
        let target = match context.kind {
            PlaylistContextKind::Manifest => PlaylistTarget::main(0, 0),
            PlaylistContextKind::Level => {
                PlaylistTarget::main(context.level.unwrap_or(0), context.url_id)
            }
            PlaylistContextKind::AudioTrack => PlaylistTarget {
                kind: LevelType::Audio,
                level: context.id.unwrap_or(0),
                url_id: 0,
            },
            PlaylistContextKind::SubtitleTrack => PlaylistTarget {
                kind: LevelType::Subtitle,
                level: context.id.unwrap_or(0),
                url_id: 0,
            },
        };

        let details = match parse_media_playlist(data, &context.url, target) {
            Ok(details) => details,
            Err(err) => return cx.error(parsing_error(&context, err.to_string())),
        };
        if details.target_duration <= 0.0 {
            return cx.error(parsing_error(&context, "invalid target duration"));
        }
        stats.tparsed = Some(cx.now());
        debug!(
            kind = ?context.kind,
            start_sn = details.start_sn,
            end_sn = details.end_sn,
            live = details.live,
            "media playlist parsed"
        );

        let event = match context.kind {
            PlaylistContextKind::Manifest => Event::ManifestLoaded {
                manifest: ParsedManifest {
                    variants: vec![single_variant(context.url.clone())],
                    ..ParsedManifest::default()
                },
                url: context.url,
                details: Some(details),
                stats,
            },
            PlaylistContextKind::Level => Event::LevelLoaded {
                level: context.level.unwrap_or(0),
                details,
                stats,
            },
            PlaylistContextKind::AudioTrack => Event::AudioTrackLoaded {
                id: context.id.unwrap_or(0),
                details,
                stats,
            },
            PlaylistContextKind::SubtitleTrack => Event::SubtitleTrackLoaded {
                id: context.id.unwrap_or(0),
                details,
                stats,
            },
        };
        cx.emit(event);
    }
}

fn single_variant(url: Url) -> ParsedVariant {
    ParsedVariant {
        url,
        bitrate: 0,
        width: None,
        height: None,
        name: None,
        codecs: None,
        video_codec: None,
        audio_codec: None,
        unknown_codecs: Vec::new(),
        audio_group: None,
        text_group: None,
    }
}

fn parsing_error(context: &PlaylistContext, reason: impl Into<String>) -> ErrorData {
    ErrorData::new(ErrorKind::Network, ErrorDetails::ManifestParsingError, true)
        .with_reason(reason)
        .with_context(context.clone())
}

fn load_error(context: &PlaylistContext, timeout: bool, reason: impl Into<String>) -> ErrorData {
    let (details, fatal) = match (context.kind, timeout) {
        (PlaylistContextKind::Manifest, false) => (ErrorDetails::ManifestLoadError, true),
        (PlaylistContextKind::Manifest, true) => (ErrorDetails::ManifestLoadTimeout, true),
        (PlaylistContextKind::Level, false) => (ErrorDetails::LevelLoadError, false),
        (PlaylistContextKind::Level, true) => (ErrorDetails::LevelLoadTimeout, false),
        (PlaylistContextKind::AudioTrack, false) => (ErrorDetails::AudioTrackLoadError, false),
        (PlaylistContextKind::AudioTrack, true) => (ErrorDetails::AudioTrackLoadTimeout, false),
        (PlaylistContextKind::SubtitleTrack, false) => {
            (ErrorDetails::SubtitleTrackLoadError, false)
        }
        (PlaylistContextKind::SubtitleTrack, true) => {
            (ErrorDetails::SubtitleTrackLoadTimeout, false)
        }
    };
    let mut data = ErrorData::new(ErrorKind::Network, details, fatal)
        .with_reason(reason)
        .with_context(context.clone());
    if let Some(level) = context.level {
        data = data.with_level(level);
    }
    data
}

impl Component for PlaylistLoader {
    fn name(&self) -> &'static str {
        "playlist-loader"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::ManifestLoading,
            EventKind::LevelLoading,
            EventKind::AudioTrackLoading,
            EventKind::SubtitleTrackLoading,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        let context = match event {
            Event::ManifestLoading { url } => PlaylistContext {
                kind: PlaylistContextKind::Manifest,
                url: url.clone(),
                level: None,
                id: None,
                url_id: 0,
            },
            Event::LevelLoading { level, url_id, url } => PlaylistContext {
                kind: PlaylistContextKind::Level,
                url: url.clone(),
                level: Some(*level),
                id: None,
                url_id: *url_id,
            },
            Event::AudioTrackLoading { id, url } => PlaylistContext {
                kind: PlaylistContextKind::AudioTrack,
                url: url.clone(),
                level: None,
                id: Some(*id),
                url_id: 0,
            },
            Event::SubtitleTrackLoading { id, url } => PlaylistContext {
                kind: PlaylistContextKind::SubtitleTrack,
                url: url.clone(),
                level: None,
                id: Some(*id),
                url_id: 0,
            },
            _ => return Ok(()),
        };
        self.load(context, cx);
        Ok(())
    }

    fn on_load(
        &mut self,
        id: RequestId,
        outcome: LoadOutcome,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        let Some(kind) = self
            .in_flight
            .iter()
            .find(|(_, f)| f.id == id)
            .map(|(kind, _)| *kind)
        else {
            return Ok(());
        };
        let Some(InFlight { context, .. }) = self.in_flight.remove(&kind) else {
            return Ok(());
        };

        match outcome {
            LoadOutcome::Success { data, stats } => self.on_success(context, &data, stats, cx),
            LoadOutcome::Error { code, text } => {
                warn!(url = %context.url, ?code, %text, "playlist load failed");
                let reason = match code {
                    Some(code) => format!("HTTP {code}: {text}"),
                    None => text,
                };
                cx.error(load_error(&context, false, reason));
            }
            LoadOutcome::Timeout { .. } => {
                warn!(url = %context.url, "playlist load timed out");
                cx.error(load_error(&context, true, "timeout"));
            }
        }
        Ok(())
    }
}
