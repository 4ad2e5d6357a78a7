// Copyright (C) Microsoft Corporation. All rights reserved.

/// Uids per Android user.
pub const AID_USER_OFFSET: u32 = 100_000;

/// Identity of the client issuing a request.
///
/// Supplied by the IPC layer; the service trusts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerContext {
    /// Calling uid
    pub uid: u32,

    /// Calling pid
    pub pid: u32,
}

impl CallerContext {
    /// Caller with `uid` and an unknown pid.
    pub fn new(uid: u32) -> Self {
        Self { uid, pid: 0 }
    }

    /// Android user the caller belongs to.
    pub fn user_id(&self) -> u32 {
        self.uid / AID_USER_OFFSET
    }
}
