//! Domain models

pub mod bulletin;
pub mod import;
pub mod metadata;
pub mod source;

pub use bulletin::{Bulletin, Media, NewBulletin, NewMedia, STATUS_MACHINE_CREATED};
pub use import::{
    ImportData, ImportJournal, ImportMode, ImportOptions, ImportStatus, NewImport, WebDescriptor,
};
pub use metadata::{MetaKey, TagMap, TagValue, VideoInfo};
pub use source::{Source, SourceHints};
