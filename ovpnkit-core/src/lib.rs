//! VPN credential and enrollment lifecycle engine.
//!
//! This crate manages the server-side state a password-authenticated VPN
//! deployment needs: the flat credential file the daemon's auth hook reads,
//! per-client network identity descriptors, the enrollment records of the
//! people behind those credentials, and short-lived single-use links for
//! handing out client configuration artifacts.
//!
//! [`Provisioner`] is the entry point; it owns the individual stores and
//! sequences multi-store operations so their invariants hold. The stores are
//! also usable on their own.
//!
//! ```no_run
//! use ovpnkit_core::Provisioner;
//! use secrecy::SecretString;
//!
//! # fn main() -> Result<(), ovpnkit_core::ProvisionError> {
//! let engine = Provisioner::open("/var/lib/ovpnkit")?;
//! engine.register_account(
//!     "alice",
//!     "alice@example.com",
//!     &SecretString::from("portal password".to_string()),
//!     None,
//! )?;
//! engine.approve_account("alice", "admin", None)?;
//! engine.establish_or_rotate_credential(
//!     "alice",
//!     &SecretString::from("vpn password".to_string()),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod allocator;
pub mod clock;
pub mod config;
pub mod credstore;
pub mod error;
pub mod hash;
pub mod links;
pub mod paths;
pub mod provision;
pub mod registry;
pub mod response;
pub mod status;
pub mod tool;

pub use account::{Account, AccountRole, AccountStatus, DEFAULT_DEVICE_LIMIT};
pub use allocator::{IdentityAllocator, IdentityDescriptor, DEFAULT_POOL};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ServerConfig, ServerConfigFile};
pub use credstore::CredentialStore;
pub use error::{ProvisionError, ProvisionResult};
pub use links::{DownloadLink, IssuedLink, LinkIssuer, LinkStatus};
pub use paths::ProvisionPaths;
pub use provision::{Provisioner, ReloadHook};
pub use registry::{AccountRegistry, RegistryStats};
pub use response::{AccountView, ApiResponse};
pub use status::{ServiceStatus, StatusProbe};
pub use tool::{ToolOutput, ToolRunner};
