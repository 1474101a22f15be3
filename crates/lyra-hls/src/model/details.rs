use url::Url;

use super::fragment::{Fragment, FragmentSn};

/// `#EXT-X-PLAYLIST-TYPE` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

/// Parsed media playlist of one level or track.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelDetails {
    pub url: Url,
    pub fragments: Vec<Fragment>,
    pub init_segment: Option<Fragment>,
    pub target_duration: f64,
    pub average_target_duration: f64,
    pub total_duration: f64,
    pub start_sn: u64,
    pub end_sn: u64,
    pub start_cc: u64,
    pub end_cc: u64,
    pub live: bool,
    pub playlist_type: Option<PlaylistType>,
    pub start_time_offset: Option<f64>,
    /// Fragment timing was corrected from demuxed PTS at least once.
    pub pts_known: bool,
    pub version: Option<usize>,
    /// Fragmented MP4 without `#EXT-X-MAP`: ranges come from a sidx box.
    pub needs_sidx_ranges: bool,
}

impl LevelDetails {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            fragments: Vec::new(),
            init_segment: None,
            target_duration: 0.0,
            average_target_duration: 0.0,
            total_duration: 0.0,
            start_sn: 0,
            end_sn: 0,
            start_cc: 0,
            end_cc: 0,
            live: true,
            playlist_type: None,
            start_time_offset: None,
            pts_known: false,
            version: None,
            needs_sidx_ranges: false,
        }
    }

    /// Recompute derived fields from `fragments`.
    pub fn refresh_derived(&mut self) {
        self.total_duration = self.fragments.iter().map(|f| f.duration).sum();
        #[expect(clippy::cast_precision_loss)]
        let count = self.fragments.len() as f64;
        self.average_target_duration = if self.fragments.is_empty() {
            0.0
        } else {
            self.total_duration / count
        };
        if let (Some(first), Some(last)) = (self.fragments.first(), self.fragments.last()) {
            self.start_sn = first.media_sn().unwrap_or(self.start_sn);
            self.end_sn = last.media_sn().unwrap_or(self.end_sn);
            self.start_cc = first.cc;
            self.end_cc = last.cc;
        }
    }

    /// Index of fragment `sn` in `fragments`, when inside the window.
    pub fn index_of(&self, sn: FragmentSn) -> Option<usize> {
        let sn = sn.media()?;
        if self.fragments.is_empty() || sn < self.start_sn || sn > self.end_sn {
            return None;
        }
        usize::try_from(sn - self.start_sn).ok()
    }

    pub fn fragment(&self, sn: FragmentSn) -> Option<&Fragment> {
        self.index_of(sn).and_then(|i| self.fragments.get(i))
    }

    pub fn has_program_date_time(&self) -> bool {
        self.fragments
            .first()
            .is_some_and(|f| f.program_date_time.is_some())
    }

    /// End of the last fragment.
    pub fn edge(&self) -> f64 {
        self.fragments.last().map_or(0.0, Fragment::end)
    }

    /// Start of the first fragment.
    pub fn window_start(&self) -> f64 {
        self.fragments.first().map_or(0.0, |f| f.start)
    }
}

#[cfg(test)]
pub(crate) fn test_details(start_sn: u64, count: u64, duration: f64) -> LevelDetails {
    let mut details = LevelDetails::new(Url::parse("https://example.com/level.m3u8").unwrap());
    details.target_duration = duration;
    details.fragments = (0..count)
        .map(|i| {
            #[expect(clippy::cast_precision_loss)]
            let start = i as f64 * duration;
            super::fragment::test_fragment(start_sn + i, start, duration)
        })
        .collect();
    details.start_sn = start_sn;
    details.refresh_derived();
    details
}
