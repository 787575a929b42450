//! An intercepting, snapshotting forward proxy for hermetic container-image
//! builds.
//!
//! The proxy records every outbound exchange on a first "learning" build and
//! replays only those recorded exchanges on subsequent builds, refusing
//! anything not already captured. It works by terminating TLS under a
//! self-signed, in-memory certificate authority, classifying each request
//! against a declarative rule set, and consulting a content-addressed
//! snapshot index and blob store.
//!
//! # Key concepts
//! - [blob] — content-addressed storage for captured response bodies.
//! - [snapshot] — the fingerprint → response-metadata index.
//! - [snapshotter] — the per-request cache/capture state machine.
//! - [rules] and [filter] — the admission control layer.
//! - [ca] and [connect] — TLS interception.
//! - [server] — the listener and request dispatch.
//!
//! # Compatibility
//! - Runtime: `tokio`
//! - HTTP: `hyper` 1.x

/// Certificate authority for on-the-fly TLS interception.
pub mod ca;

/// Content-addressed blob storage.
pub mod blob;

/// HTTP request and response body handling utilities.
pub mod body;

/// Rule configuration loading.
pub mod config;

/// CONNECT handling and TLS session serving.
pub mod connect;

/// Error taxonomy for per-request and startup failures.
pub mod error;

/// Rule-based admission control dispatch.
pub mod filter;

/// Response generation utilities and traits.
pub mod responder;

/// Rule-based admission control data: actions and rule sets.
pub mod rules;

/// The listener and request dispatch.
pub mod server;

/// The fingerprint → response-metadata index.
pub mod snapshot;

/// The per-request cache/capture state machine.
pub mod snapshotter;

/// Structured logging setup.
pub mod tracing;

/// Core type definitions used throughout the proxy.
pub mod types;

/// A one-shot HTTP/HTTPS client for origin fetches.
pub mod upstream;
