//! Client-side STOMP protocol engine for versions 1.0, 1.1 and 1.2.
//!
//! The crate centers on [`Session`], a single-task state machine that owns
//! the transport, the parse and write buffers, the subscription and receipt
//! registries, and a table of user callbacks. Request operations
//! (`subscribe`, `send`, `begin`, ...) are synchronous and only buffer
//! outbound frames; [`Session::run`] is the one awaited call, driving
//! flushes, reads, heartbeats and callback dispatch until the session
//! terminates.
//!
//! The wire layer is reusable on its own: [`StompCodec`] implements
//! `tokio_util::codec::{Decoder, Encoder}` over version-aware header
//! escaping and incremental frame parsing.
//!
//! ```no_run
//! use stomp_session::{CallbackKind, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stomp_session::StompError> {
//!     let mut session = Session::new(());
//!     session.callback_set(
//!         CallbackKind::Connected,
//!         Box::new(|session, _frame| {
//!             session
//!                 .subscribe(vec![("destination".into(), "/queue/test".into())])
//!                 .unwrap();
//!         }),
//!     );
//!     session.callback_set(
//!         CallbackKind::Message,
//!         Box::new(|_, frame| {
//!             println!("{}", frame.unwrap());
//!         }),
//!     );
//!     session.connect("localhost", "61613", Vec::new()).await?;
//!     session.run().await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod heartbeat;
pub mod parser;
pub mod session;

pub use codec::{StompCodec, StompItem};
pub use error::StompError;
pub use frame::{Command, Frame};
pub use header::Version;
pub use heartbeat::{HeartbeatMonitor, USER_TICK, negotiate_heartbeats, parse_heartbeat_header};
pub use parser::{ParseOutcome, parse_frame_slice};
pub use session::{Callback, CallbackKind, Session, SessionState, Transport};
