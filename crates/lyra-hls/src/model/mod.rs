//! Playlist data model shared by parsing, merging and the controllers.

mod details;
mod fragment;
mod key;
mod level;
mod track;

#[cfg(test)]
pub(crate) use details::test_details;
pub use details::{LevelDetails, PlaylistType};
#[cfg(test)]
pub(crate) use fragment::test_fragment;
pub use fragment::{
    ByteRange, ElementaryStreams, Fragment, FragmentKey, FragmentSn, LevelType, StreamType,
};
pub(crate) use key::parse_iv;
pub use key::{EncryptionMethod, LevelKey};
pub use level::{Ladder, Level};
pub use track::{MediaTrack, TrackKind};
