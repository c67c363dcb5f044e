pub mod draft;
pub mod fields;
pub mod live;
pub mod log;
pub mod satellite;

pub use draft::{DraftMod, DraftModFile, DraftModVersion, DraftState};
pub use fields::{FileFields, ModFields, VersionFields};
pub use live::{Mod, ModFile, ModVersion};
pub use log::{LogMod, LogModFile, LogModVersion};
pub use satellite::{Author, GameVersion, StoredFile};
