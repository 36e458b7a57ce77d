//! Client side of the search-status pipeline.
//!
//! Keeps an in-memory [`JobMirror`] of search jobs fresh from two sources:
//! paged bulk fetches through a [`JobSource`], and live status updates read
//! from the event stream through a [`StreamTransport`]. A
//! [`ReconcileSession`] ties the two together and reopens the stream after
//! failures.

pub mod error;
pub mod frame;
pub mod mirror;
pub mod session;
pub mod source;
pub mod transport;

pub use error::ClientError;
pub use frame::{FrameDecoder, ServerFrame, StreamMessage};
pub use mirror::{JobMirror, MergeOutcome};
pub use session::{ConnectionState, ReconcileSession, ReconnectPolicy};
pub use source::{HttpJobSource, JobPage, JobSource, PageRequest};
pub use transport::{FrameStream, HttpStreamTransport, StreamTransport};
