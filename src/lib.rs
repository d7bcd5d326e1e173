//! Registry authentication and manifest digest resolution, for deciding
//! whether a running container's image is out of date.
//!
//! The entry point is [`Client::compare_digest`]: it negotiates access with
//! the image's registry, reads the remote manifest digest (with a `HEAD`
//! request when the registry allows it) and compares it to the repository
//! digests of the local image.
#![deny(missing_docs)]

pub mod auth;
pub mod challenge;
pub mod client;
pub mod config;
pub mod container;
pub mod digest;
pub mod errors;
pub mod manifest;
pub mod reference;
pub mod secrets;
mod token;

#[doc(inline)]
pub use challenge::{Challenge, ChallengeScheme};
#[doc(inline)]
pub use client::Client;
#[doc(inline)]
pub use config::{ClientConfig, ClientProtocol};
#[doc(inline)]
pub use container::{Container, ImageInfo};
#[doc(inline)]
pub use digest::{match_digests, normalize_digest};
#[doc(inline)]
pub use errors::{RegistryError, Result};
#[doc(inline)]
pub use reference::{ImageReference, TagOrDigest};
#[doc(inline)]
pub use secrets::{transform_credential, Credential};
#[doc(inline)]
pub use token::TokenGrant;

#[macro_use]
extern crate lazy_static;
