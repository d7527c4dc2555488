//! Session state machine and handle minting.

use rand::RngCore;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Protocol session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Terminated,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Terminated => "terminated",
        }
    }
}

/// Opaque token echoed in the `Mcp-Session-Id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// 128 random bits as 32 lowercase hex characters.
    pub fn mint() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct Slot {
    state: SessionState,
    handle: Option<SessionHandle>,
    protocol_version: Option<String>,
    client_name: Option<String>,
}

/// The single session this bridge models.
#[derive(Debug)]
pub struct SessionTracker {
    slot: Mutex<Slot>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: SessionState::Uninitialized,
                handle: None,
                protocol_version: None,
                client_name: None,
            }),
        }
    }

    /// Record a successful `initialize`. A handle is minted only when none is
    /// held, so repeated initialization keeps the existing one.
    pub fn initialize(&self, protocol_version: &str, client_name: Option<String>) -> SessionHandle {
        let mut slot = self.lock();
        slot.state = SessionState::Initialized;
        slot.protocol_version = Some(protocol_version.to_string());
        if client_name.is_some() {
            slot.client_name = client_name;
        }
        if let Some(handle) = &slot.handle {
            return handle.clone();
        }
        let handle = SessionHandle::mint();
        info!(
            session = %handle,
            protocol_version,
            client = slot.client_name.as_deref().unwrap_or("unknown"),
            "session initialized"
        );
        slot.handle = Some(handle.clone());
        handle
    }

    /// Tear down the session. Returns the handle that was cleared, if any.
    pub fn terminate(&self) -> Option<SessionHandle> {
        let mut slot = self.lock();
        slot.state = SessionState::Terminated;
        slot.protocol_version = None;
        let cleared = slot.handle.take();
        if let Some(handle) = &cleared {
            info!(session = %handle, "session terminated");
        }
        cleared
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        self.lock().handle.clone()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.lock().protocol_version.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
