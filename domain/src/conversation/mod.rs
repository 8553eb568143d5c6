//! Conversation domain: the persisted, branchable turn history.
//!
//! - [`entities::Session`]: a conversation and its mainline pointer
//! - [`entities::Turn`]: user or AI contribution
//! - [`response::ProviderResponse`]: one provider's output for one step
//! - [`provider_context::ProviderContexts`]: continuation metadata per provider

pub mod entities;
pub mod provider_context;
pub mod response;
