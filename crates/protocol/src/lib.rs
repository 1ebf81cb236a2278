//! # File Manager Protocol Library
//!
//! Shared vocabulary between the file manager core and whatever transport
//! carries requests to it.
//!
//! ## Overview
//!
//! - **Operation Flags**: the [`FileFlags`] bitmask a request carries and the
//!   semantics table ([`classify`]) that decides which combinations are legal
//! - **Denial Reasons**: the [`DenyReason`] taxonomy and its HTTP status mapping
//! - **Message Definitions**: request/response messages spoken on the
//!   file manager port, wrapped in a versioned [`Envelope`]
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{classify, FileFlags};
//!
//! let classification = classify(FileFlags::CREATE | FileFlags::DELETE);
//! assert!(!classification.is_valid());
//!
//! let classification = classify(FileFlags::APPEND);
//! assert!(classification.flags.contains(FileFlags::WRITE));
//! ```
//!
//! ## Modules
//!
//! - [`flags`]: Operation bitmask and flag semantics table
//! - [`messages`]: Protocol message definitions
//! - [`error`]: Error types

pub mod error;
pub mod flags;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use flags::{classify, describe_flags, parse_flag_list, Classification, FileFlags, FlagConflict, Intent};
pub use messages::{DenyReason, Envelope, Message, PROTOCOL_VERSION};
