pub mod progress;
pub mod session;

pub use progress::{ProgressSnapshot, UploadCompleted};
pub use session::{ByteRange, PartState, PartStatus, SessionStatus, UploadSession};
