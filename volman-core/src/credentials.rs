// SPDX-License-Identifier: GPL-3.0-only

//! Credential prompting for mount operations.
//!
//! A fresh [`CredentialBridge`] is created for every dispatched operation.
//! The bridge forwards the mount service's request to an external
//! [`SecretPrompt`] and hands the reply back.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use enumflags2::{BitFlags, bitflags};
use tracing::debug;
use volman_types::VolumeError;

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskPasswordFlag {
    NeedPassword = 1 << 0,
    NeedUsername = 1 << 1,
    NeedDomain = 1 << 2,
    SavingSupported = 1 << 3,
    AnonymousSupported = 1 << 4,
    Tcrypt = 1 << 5,
}

pub type AskPasswordFlags = BitFlags<AskPasswordFlag>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRequest {
    pub message: String,
    pub default_user: String,
    pub default_domain: String,
    pub flags: AskPasswordFlags,
}

impl SecretRequest {
    /// Passphrase-only request, as used for unlocking encrypted volumes
    pub fn passphrase(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            default_user: String::new(),
            default_domain: String::new(),
            flags: AskPasswordFlag::NeedPassword.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PasswordSave {
    #[default]
    Never,
    ForSession,
    Permanently,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub secret: String,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub remember: PasswordSave,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("secret", &"<redacted>")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("remember", &self.remember)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretReply {
    Provided(Credentials),
    Cancelled,
}

/// Interactive credential source, usually backed by a UI dialog
#[async_trait]
pub trait SecretPrompt: Send + Sync {
    async fn request_secret(&self, request: SecretRequest) -> SecretReply;
}

/// Prompt that declines every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

#[async_trait]
impl SecretPrompt for NoPrompt {
    async fn request_secret(&self, _request: SecretRequest) -> SecretReply {
        SecretReply::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    AwaitingSecret,
}

pub struct CredentialBridge {
    prompt: Arc<dyn SecretPrompt>,
    state: Mutex<BridgeState>,
}

impl std::fmt::Debug for CredentialBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBridge")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Puts the bridge back to `Idle` however the prompt future ends.
struct IdleOnDrop<'a>(&'a Mutex<BridgeState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = BridgeState::Idle;
    }
}

impl CredentialBridge {
    pub fn new(prompt: Arc<dyn SecretPrompt>) -> Self {
        Self {
            prompt,
            state: Mutex::new(BridgeState::Idle),
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn ask_password(&self, request: SecretRequest) -> Result<Credentials, VolumeError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == BridgeState::AwaitingSecret {
                return Err(VolumeError::Busy(
                    "a credential request is already in progress".to_string(),
                ));
            }
            *state = BridgeState::AwaitingSecret;
        }
        let _idle = IdleOnDrop(&self.state);

        debug!(flags = ?request.flags, "Requesting credentials");
        match self.prompt.request_secret(request).await {
            SecretReply::Provided(credentials) => Ok(credentials),
            SecretReply::Cancelled => {
                debug!("Credential request cancelled");
                Err(VolumeError::AuthCancelled)
            }
        }
    }
}
