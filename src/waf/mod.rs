// Filter evasion: payload mutation and block heuristics

pub mod detector;
pub mod mutate;

pub use detector::{guess_vendor, is_blocked_status};
pub use mutate::{alternate_encodings, Mutator};
