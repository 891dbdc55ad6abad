//! Application Services
//!
//! ## Available Services
//!
//! - **Authorizer**: Token verification and membership/ownership checks
//! - **MessageRouter**: Posts and history reads for channels
//! - **DirectoryService**: Servers, channels and membership
//! - **ProfileService**: The caller's own profile

pub mod authorizer;
pub mod directory_service;
pub mod message_router;
pub mod profile_service;

pub use authorizer::Authorizer;
pub use directory_service::DirectoryService;
pub use message_router::MessageRouter;
pub use profile_service::ProfileService;
