// Copyright (C) Microsoft Corporation. All rights reserved.

//! Cryptographic operations.
//!
//! A [`KeystoreOperation`] drives one backend operation through
//! `update_aad* update* finish` or `abort`. Calls on the same operation are
//! serialized with a try-lock: a caller that finds the operation busy gets
//! `OPERATION_BUSY` and the operation is left untouched. Every other error
//! terminates the operation.
//!
//! The [`OperationDb`] is the bounded slot table. It holds weak references
//! only, so releasing the last client handle aborts the operation and frees
//! its slot. When the table is full a victim is chosen by its malus:
//!
//! `malus = live operations of its owner + floor(log6(idle seconds + 1))`
//!
//! A non-forced caller holding `n` operations may prune any non-forced
//! operation with a malus above `n + 1`, or else its own least recently used
//! one. A forced caller may prune any non-forced operation. Forced operations
//! are never pruned.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Instant;

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::HardwareAuthToken;
use ks2_keymint_interface::KeyMintOperation;
use ks2_keymint_interface::KeyPurpose;
use parking_lot::Mutex;

use crate::enforcements::AuthRequirement;
use crate::enforcements::AuthTokenCache;
use crate::error::Error;
use crate::error::KsResult;
use crate::error::ResponseCode;

/// Largest input accepted by a single operation call.
pub const MAX_RECEIVE_DATA: usize = 0x8000;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Operation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Waiting for a user auth token
    AwaitingAuth,

    /// No data supplied yet
    Ready,

    /// Associated data supplied, no input yet
    AadPhase,

    /// Input supplied; associated data is closed
    BodyPhase,

    /// Finished, aborted, pruned or failed
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Abort,
    Failed(Error),
}

fn check_input_length(data: &[u8]) -> KsResult<()> {
    if data.len() > MAX_RECEIVE_DATA {
        return Err(Error::Rc(ResponseCode::TooMuchData));
    }
    Ok(())
}

fn non_empty(output: Vec<u8>) -> Option<Vec<u8>> {
    if output.is_empty() {
        None
    } else {
        Some(output)
    }
}

struct OperationInner {
    backend: Option<Box<dyn KeyMintOperation>>,
    state: OperationState,
    auth: Option<AuthRequirement>,
}

impl OperationInner {
    /// Leaves `AwaitingAuth` if a matching token is cached.
    ///
    /// # Returns
    /// * `Option<HardwareAuthToken>` - Token to hand to the backend once
    fn authorize(&mut self, tokens: &AuthTokenCache) -> KsResult<Option<HardwareAuthToken>> {
        if self.state != OperationState::AwaitingAuth {
            return Ok(None);
        }
        let token = self
            .auth
            .as_ref()
            .and_then(|req| req.find_token(tokens))
            .ok_or(Error::Km(ErrorCode::KEY_USER_NOT_AUTHENTICATED))?;
        self.state = OperationState::Ready;
        Ok(Some(token))
    }

    fn backend(&mut self) -> KsResult<&mut dyn KeyMintOperation> {
        match self.backend.as_deref_mut() {
            Some(backend) => Ok(backend),
            None => {
                tracing::error!("live operation without backend");
                Err(Error::sys())
            }
        }
    }
}

/// Arguments of [`KeystoreOperation::new`].
pub(crate) struct NewOperation {
    pub owner: u32,
    pub key_id: Option<i64>,
    pub purpose: KeyPurpose,
    pub aead: bool,
    pub forced: bool,
    pub backend: Box<dyn KeyMintOperation>,
    pub auth: Option<AuthRequirement>,
    pub tokens: Arc<AuthTokenCache>,
}

/// Client handle of a cryptographic operation.
///
/// Dropping the last reference aborts the operation.
pub struct KeystoreOperation {
    id: u64,
    owner: u32,
    key_id: Option<i64>,
    purpose: KeyPurpose,
    aead: bool,
    forced: bool,
    last_usage: Mutex<Instant>,
    terminated: AtomicBool,
    tokens: Arc<AuthTokenCache>,
    inner: Mutex<OperationInner>,
}

impl std::fmt::Debug for KeystoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoreOperation")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("key_id", &self.key_id)
            .field("purpose", &self.purpose)
            .field("forced", &self.forced)
            .finish_non_exhaustive()
    }
}

impl KeystoreOperation {
    pub(crate) fn new(new: NewOperation) -> Arc<Self> {
        let state = if new.auth.is_some() {
            OperationState::AwaitingAuth
        } else {
            OperationState::Ready
        };
        Arc::new(Self {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            owner: new.owner,
            key_id: new.key_id,
            purpose: new.purpose,
            aead: new.aead,
            forced: new.forced,
            last_usage: Mutex::new(Instant::now()),
            terminated: AtomicBool::new(false),
            tokens: new.tokens,
            inner: Mutex::new(OperationInner {
                backend: Some(new.backend),
                state,
                auth: new.auth,
            }),
        })
    }

    /// Process unique operation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the operation was created as forced.
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Current state. Blocks while a call is in progress.
    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    fn is_live(&self) -> bool {
        !self.terminated.load(Ordering::Acquire)
    }

    fn last_usage(&self) -> Instant {
        *self.last_usage.lock()
    }

    fn terminate(&self, inner: &mut OperationInner, outcome: Outcome) {
        inner.state = OperationState::Terminated;
        self.terminated.store(true, Ordering::Release);
        if let Some(mut backend) = inner.backend.take() {
            if outcome != Outcome::Success {
                if let Err(err) = backend.abort() {
                    tracing::debug!(op_id = self.id, ?err, "backend abort failed");
                }
            }
        }
        tracing::debug!(op_id = self.id, ?outcome, "operation terminated");
    }

    /// Runs `f` under the operation interlock and terminates the operation
    /// if `f` fails.
    fn with_inner<T>(&self, f: impl FnOnce(&mut OperationInner) -> KsResult<T>) -> KsResult<T> {
        let mut inner = self.inner.try_lock().ok_or_else(|| {
            tracing::debug!(op_id = self.id, "operation busy");
            Error::Rc(ResponseCode::OperationBusy)
        })?;
        if inner.state == OperationState::Terminated {
            return Err(Error::Km(ErrorCode::INVALID_OPERATION_HANDLE));
        }
        *self.last_usage.lock() = Instant::now();
        let result = f(&mut inner);
        if let Err(err) = &result {
            self.terminate(&mut inner, Outcome::Failed(*err));
        }
        result
    }

    /// Supplies associated data to an AEAD operation.
    ///
    /// # Arguments
    /// * `aad` - Associated data, at most [`MAX_RECEIVE_DATA`] bytes
    ///
    /// # Error
    /// * `OPERATION_BUSY` - Another call is in progress
    /// * `TOO_MUCH_DATA` - `aad` is too long
    /// * `ErrorCode::INVALID_TAG` - Not an AEAD operation, or input was already supplied
    /// * `ErrorCode::INVALID_OPERATION_HANDLE` - The operation has terminated
    pub fn update_aad(&self, aad: &[u8]) -> KsResult<()> {
        self.with_inner(|inner| {
            check_input_length(aad)?;
            if !self.aead || inner.state == OperationState::BodyPhase {
                return Err(Error::Km(ErrorCode::INVALID_TAG));
            }
            let token = inner.authorize(&self.tokens)?;
            inner.backend()?.update_aad(aad, token.as_ref())?;
            inner.state = OperationState::AadPhase;
            Ok(())
        })
    }

    /// Processes input and closes the associated data phase.
    ///
    /// # Arguments
    /// * `input` - Input, at most [`MAX_RECEIVE_DATA`] bytes
    ///
    /// # Returns
    /// * `Option<Vec<u8>>` - Output produced so far, if any
    pub fn update(&self, input: &[u8]) -> KsResult<Option<Vec<u8>>> {
        self.with_inner(|inner| {
            check_input_length(input)?;
            let token = inner.authorize(&self.tokens)?;
            let output = inner.backend()?.update(input, token.as_ref())?;
            inner.state = OperationState::BodyPhase;
            Ok(non_empty(output))
        })
    }

    /// Processes final input and terminates the operation.
    ///
    /// # Arguments
    /// * `input` - Final input
    /// * `signature` - Signature or MAC to check, for verify operations
    ///
    /// # Returns
    /// * `Option<Vec<u8>>` - Signature, tag or final output
    pub fn finish(&self, input: Option<&[u8]>, signature: Option<&[u8]>) -> KsResult<Option<Vec<u8>>> {
        self.with_inner(|inner| {
            if let Some(input) = input {
                check_input_length(input)?;
            }
            if let Some(signature) = signature {
                check_input_length(signature)?;
            }
            let token = inner.authorize(&self.tokens)?;
            let output = inner.backend()?.finish(input, signature, token.as_ref())?;
            self.terminate(inner, Outcome::Success);
            Ok(non_empty(output))
        })
    }

    /// Terminates the operation.
    pub fn abort(&self) -> KsResult<()> {
        self.with_inner(|inner| {
            self.terminate(inner, Outcome::Abort);
            Ok(())
        })
    }

    /// Terminates the operation unless a call is in progress.
    ///
    /// # Returns
    /// * `Option<PrunedOperation>` - Backend operation to abort, or `None` if
    ///   the operation is busy or already terminated
    fn try_prune(&self) -> Option<PrunedOperation> {
        let mut inner = self.inner.try_lock()?;
        if inner.state == OperationState::Terminated {
            return None;
        }
        inner.state = OperationState::Terminated;
        self.terminated.store(true, Ordering::Release);
        tracing::debug!(op_id = self.id, owner = self.owner, "operation pruned");
        Some(PrunedOperation {
            id: self.id,
            backend: inner.backend.take(),
        })
    }
}

impl Drop for KeystoreOperation {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state != OperationState::Terminated {
            inner.state = OperationState::Terminated;
            if let Some(mut backend) = inner.backend.take() {
                if let Err(err) = backend.abort() {
                    tracing::debug!(op_id = self.id, ?err, "backend abort failed");
                }
            }
            tracing::debug!(op_id = self.id, "operation dropped");
        }
    }
}

/// A pruned operation whose backend still needs aborting.
struct PrunedOperation {
    id: u64,
    backend: Option<Box<dyn KeyMintOperation>>,
}

impl PrunedOperation {
    fn abort(self) {
        if let Some(mut backend) = self.backend {
            if let Err(err) = backend.abort() {
                tracing::debug!(op_id = self.id, ?err, "backend abort failed");
            }
        }
    }
}

#[derive(Default)]
struct SlotTable {
    operations: Vec<Weak<KeystoreOperation>>,

    /// Slots handed out for operations still in `begin`
    reserved: usize,
}

impl SlotTable {
    /// Drops dead entries and returns the live operations.
    fn live(&mut self) -> Vec<Arc<KeystoreOperation>> {
        let mut live = Vec::new();
        self.operations.retain(|weak| match weak.upgrade() {
            Some(op) if op.is_live() => {
                live.push(op);
                true
            }
            _ => false,
        });
        live
    }
}

fn log6(mut value: u64) -> u64 {
    let mut log = 0;
    while value >= 6 {
        value /= 6;
        log += 1;
    }
    log
}

/// Picks and terminates a victim among `live`.
fn prune_one(
    live: &[Arc<KeystoreOperation>],
    owner: u32,
    forced: bool,
) -> KsResult<PrunedOperation> {
    let now = Instant::now();
    let mut owner_counts: HashMap<u32, u64> = HashMap::new();
    for op in live {
        *owner_counts.entry(op.owner).or_default() += 1;
    }
    let caller_count = owner_counts.get(&owner).copied().unwrap_or(0);

    let mut candidates: Vec<(u64, Instant, &Arc<KeystoreOperation>)> = live
        .iter()
        .filter(|op| !op.forced)
        .map(|op| {
            let last_usage = op.last_usage();
            let idle = now.saturating_duration_since(last_usage).as_secs();
            let count = owner_counts.get(&op.owner).copied().unwrap_or(0);
            (count + log6(idle + 1), last_usage, op)
        })
        .collect();

    if !forced {
        let threshold = caller_count + 1;
        if candidates.iter().any(|(malus, _, _)| *malus > threshold) {
            candidates.retain(|(malus, _, _)| *malus > threshold);
        } else {
            candidates.retain(|(_, _, op)| op.owner == owner);
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    for (malus, _, op) in candidates {
        if let Some(pruned) = op.try_prune() {
            tracing::debug!(victim = op.id, malus, owner, forced, "victim selected");
            return Ok(pruned);
        }
    }
    tracing::debug!(owner, forced, "no prunable operation");
    Err(Error::Rc(ResponseCode::BackendBusy))
}

/// A slot held for an operation being created.
///
/// Released when dropped unless filled.
pub(crate) struct SlotReservation {
    table: Arc<Mutex<SlotTable>>,
    filled: bool,
}

impl SlotReservation {
    /// Registers `op` in the reserved slot.
    pub fn fill(mut self, op: &Arc<KeystoreOperation>) {
        {
            let mut table = self.table.lock();
            table.reserved = table.reserved.saturating_sub(1);
            table.operations.push(Arc::downgrade(op));
        }
        self.filled = true;
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if !self.filled {
            let mut table = self.table.lock();
            table.reserved = table.reserved.saturating_sub(1);
        }
    }
}

/// Bounded table of live operations of one security level.
pub(crate) struct OperationDb {
    capacity: usize,
    table: Arc<Mutex<SlotTable>>,
}

impl OperationDb {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            table: Arc::new(Mutex::new(SlotTable::default())),
        }
    }

    /// Number of live operations.
    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        let live = self.table.lock().live();
        live.len()
    }

    /// Reserves a slot for `owner`, pruning a victim if the table is full.
    ///
    /// # Error
    /// * `BACKEND_BUSY` - Nothing could be pruned
    pub fn reserve(&self, owner: u32, forced: bool) -> KsResult<SlotReservation> {
        let mut table = self.table.lock();
        let live = table.live();
        let pruned = if live.len() + table.reserved < self.capacity {
            None
        } else {
            match prune_one(&live, owner, forced) {
                Ok(pruned) => Some(pruned),
                Err(err) => {
                    drop(table);
                    return Err(err);
                }
            }
        };
        table.reserved += 1;
        drop(table);
        drop(live);

        if let Some(pruned) = pruned {
            pruned.abort();
        }
        Ok(SlotReservation {
            table: self.table.clone(),
            filled: false,
        })
    }

    /// Prunes one operation to make room in the backend.
    ///
    /// # Error
    /// * `BACKEND_BUSY` - Nothing could be pruned
    pub fn prune(&self, owner: u32, forced: bool) -> KsResult<()> {
        let mut table = self.table.lock();
        let live = table.live();
        let pruned = prune_one(&live, owner, forced);
        drop(table);
        drop(live);
        pruned.map(PrunedOperation::abort)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use ks2_keymint_interface::HardwareAuthenticatorType;
    use ks2_keymint_interface::KmResult;
    use test_with_tracing::test;

    use super::*;

    /// Echo backend; optionally blocks in `update` until signalled.
    struct EchoOp {
        aborted: Arc<AtomicBool>,
        entered: Option<mpsc::Sender<()>>,
        release: Option<mpsc::Receiver<()>>,
    }

    impl EchoOp {
        fn new() -> (Box<Self>, Arc<AtomicBool>) {
            let aborted = Arc::new(AtomicBool::new(false));
            let op = Box::new(Self {
                aborted: aborted.clone(),
                entered: None,
                release: None,
            });
            (op, aborted)
        }
    }

    impl KeyMintOperation for EchoOp {
        fn update_aad(&mut self, _aad: &[u8], _token: Option<&HardwareAuthToken>) -> KmResult<()> {
            Ok(())
        }

        fn update(&mut self, input: &[u8], _token: Option<&HardwareAuthToken>) -> KmResult<Vec<u8>> {
            if let (Some(entered), Some(release)) = (self.entered.take(), self.release.take()) {
                let _ = entered.send(());
                let _ = release.recv();
            }
            Ok(input.to_vec())
        }

        fn finish(
            &mut self,
            input: Option<&[u8]>,
            _signature: Option<&[u8]>,
            _token: Option<&HardwareAuthToken>,
        ) -> KmResult<Vec<u8>> {
            Ok(input.map(<[u8]>::to_vec).unwrap_or_default())
        }

        fn abort(&mut self) -> KmResult<()> {
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn operation(owner: u32, aead: bool, forced: bool) -> (Arc<KeystoreOperation>, Arc<AtomicBool>) {
        let (backend, aborted) = EchoOp::new();
        let op = KeystoreOperation::new(NewOperation {
            owner,
            key_id: None,
            purpose: KeyPurpose::Encrypt,
            aead,
            forced,
            backend,
            auth: None,
            tokens: Arc::new(AuthTokenCache::new()),
        });
        (op, aborted)
    }

    fn admit(db: &OperationDb, owner: u32, forced: bool) -> KsResult<Arc<KeystoreOperation>> {
        let slot = db.reserve(owner, forced)?;
        let (op, _) = operation(owner, false, forced);
        slot.fill(&op);
        Ok(op)
    }

    #[test]
    fn test_aad_ordering() {
        let (op, aborted) = operation(1, true, false);
        assert_eq!(op.update_aad(b"hdr"), Ok(()));
        assert_eq!(op.state(), OperationState::AadPhase);
        assert_eq!(op.update(b"msg1"), Ok(Some(b"msg1".to_vec())));
        assert_eq!(op.update_aad(b"late"), Err(Error::Km(ErrorCode::INVALID_TAG)));
        assert!(aborted.load(Ordering::SeqCst));
        assert_eq!(
            op.update(b"msg2"),
            Err(Error::Km(ErrorCode::INVALID_OPERATION_HANDLE))
        );
    }

    #[test]
    fn test_aad_on_non_aead() {
        let (op, _) = operation(1, false, false);
        assert_eq!(op.update_aad(b"hdr"), Err(Error::Km(ErrorCode::INVALID_TAG)));
        assert_eq!(op.state(), OperationState::Terminated);
    }

    #[test]
    fn test_too_much_data() {
        let (op, aborted) = operation(1, false, false);
        let input = vec![0u8; MAX_RECEIVE_DATA];
        assert_eq!(op.update(&input), Ok(Some(input.clone())));
        let input = vec![0u8; MAX_RECEIVE_DATA + 1];
        assert_eq!(op.update(&input), Err(Error::Rc(ResponseCode::TooMuchData)));
        assert!(aborted.load(Ordering::SeqCst));
        assert_eq!(
            op.finish(None, None),
            Err(Error::Km(ErrorCode::INVALID_OPERATION_HANDLE))
        );
    }

    #[test]
    fn test_finish_terminates() {
        let (op, aborted) = operation(1, false, false);
        assert_eq!(op.finish(Some(b"last"), None), Ok(Some(b"last".to_vec())));
        assert!(!aborted.load(Ordering::SeqCst));
        assert_eq!(
            op.abort(),
            Err(Error::Km(ErrorCode::INVALID_OPERATION_HANDLE))
        );
    }

    #[test]
    fn test_drop_aborts() {
        let (op, aborted) = operation(1, false, false);
        drop(op);
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_call_is_busy() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let aborted = Arc::new(AtomicBool::new(false));
        let op = KeystoreOperation::new(NewOperation {
            owner: 1,
            key_id: None,
            purpose: KeyPurpose::Encrypt,
            aead: false,
            forced: false,
            backend: Box::new(EchoOp {
                aborted: aborted.clone(),
                entered: Some(entered_tx),
                release: Some(release_rx),
            }),
            auth: None,
            tokens: Arc::new(AuthTokenCache::new()),
        });

        let first = {
            let op = op.clone();
            thread::spawn(move || op.update(b"x"))
        };
        entered_rx.recv().expect("first call entered");
        assert_eq!(op.update(b"x"), Err(Error::Rc(ResponseCode::OperationBusy)));
        release_tx.send(()).expect("release");
        assert_eq!(first.join().expect("join"), Ok(Some(b"x".to_vec())));

        assert_eq!(op.update(b"y"), Ok(Some(b"y".to_vec())));
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_awaiting_auth() {
        let tokens = Arc::new(AuthTokenCache::new());
        let auth = AuthRequirement::PerOperation {
            challenge: 9,
            sids: vec![5],
            auth_type: HardwareAuthenticatorType::PASSWORD,
        };
        let new_op = |auth: AuthRequirement| {
            KeystoreOperation::new(NewOperation {
                owner: 1,
                key_id: None,
                purpose: KeyPurpose::Sign,
                aead: false,
                forced: false,
                backend: EchoOp::new().0,
                auth: Some(auth),
                tokens: tokens.clone(),
            })
        };

        let op = new_op(auth.clone());
        assert_eq!(op.state(), OperationState::AwaitingAuth);
        assert_eq!(
            op.update(b"x"),
            Err(Error::Km(ErrorCode::KEY_USER_NOT_AUTHENTICATED))
        );
        assert_eq!(op.state(), OperationState::Terminated);

        let op = new_op(auth);
        tokens.add(HardwareAuthToken {
            challenge: 9,
            user_id: 5,
            authenticator_type: HardwareAuthenticatorType::PASSWORD,
            ..Default::default()
        });
        assert_eq!(op.update(b"x"), Ok(Some(b"x".to_vec())));
        assert_eq!(op.state(), OperationState::BodyPhase);
    }

    #[test]
    fn test_log6() {
        assert_eq!(log6(1), 0);
        assert_eq!(log6(5), 0);
        assert_eq!(log6(6), 1);
        assert_eq!(log6(35), 1);
        assert_eq!(log6(36), 2);
    }

    #[test]
    fn test_slots_and_release() {
        let db = OperationDb::new(2);
        let a = admit(&db, 1, false).expect("a");
        let _b = admit(&db, 2, false).expect("b");
        assert_eq!(db.live_count(), 2);
        drop(a);
        assert_eq!(db.live_count(), 1);
        let _c = admit(&db, 3, false).expect("c");
        assert_eq!(db.live_count(), 2);
    }

    #[test]
    fn test_forced_prunes_idlest() {
        let db = OperationDb::new(3);
        let ops: Vec<_> = (0..3)
            .map(|_| {
                let op = admit(&db, 10, false).expect("admit");
                thread::sleep(Duration::from_millis(2));
                op
            })
            .collect();
        ops[0].update(b"keep").expect("update");

        let forced = admit(&db, 1000, true).expect("forced");
        assert!(forced.is_forced());
        assert_eq!(
            ops[1].update(b"x"),
            Err(Error::Km(ErrorCode::INVALID_OPERATION_HANDLE))
        );
        assert!(ops[0].update(b"x").is_ok());
        assert!(ops[2].update(b"x").is_ok());
    }

    #[test]
    fn test_forced_never_pruned() {
        let db = OperationDb::new(2);
        let f1 = admit(&db, 1000, true).expect("f1");
        let f2 = admit(&db, 1001, true).expect("f2");
        assert_eq!(
            admit(&db, 1002, true).err(),
            Some(Error::Rc(ResponseCode::BackendBusy))
        );
        assert_eq!(
            admit(&db, 10, false).err(),
            Some(Error::Rc(ResponseCode::BackendBusy))
        );
        assert!(f1.update(b"x").is_ok());
        assert!(f2.update(b"x").is_ok());
    }

    #[test]
    fn test_fairness() {
        let db = OperationDb::new(4);
        let hog: Vec<_> = (0..3).map(|_| admit(&db, 10, false).expect("hog")).collect();
        let light = admit(&db, 20, false).expect("light");

        // A caller with one operation may prune the owner of three.
        let newcomer = admit(&db, 30, false).expect("newcomer");
        let pruned = hog
            .iter()
            .filter(|op| op.state() == OperationState::Terminated)
            .count();
        assert_eq!(pruned, 1);
        assert!(light.update(b"x").is_ok());

        // The owner of two may not prune single-operation owners, so it
        // loses one of its own.
        let again = admit(&db, 10, false).expect("own slot");
        let live_hog = hog
            .iter()
            .filter(|op| op.state() != OperationState::Terminated)
            .count();
        assert_eq!(live_hog, 1);
        assert!(light.update(b"x").is_ok());
        assert!(newcomer.update(b"x").is_ok());
        assert!(again.update(b"x").is_ok());
    }

    #[test]
    fn test_busy_victim_is_skipped() {
        let db = OperationDb::new(1);
        let slot = db.reserve(10, false).expect("reserve");
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let op = KeystoreOperation::new(NewOperation {
            owner: 10,
            key_id: None,
            purpose: KeyPurpose::Encrypt,
            aead: false,
            forced: false,
            backend: Box::new(EchoOp {
                aborted: Arc::new(AtomicBool::new(false)),
                entered: Some(entered_tx),
                release: Some(release_rx),
            }),
            auth: None,
            tokens: Arc::new(AuthTokenCache::new()),
        });
        slot.fill(&op);

        let busy = {
            let op = op.clone();
            thread::spawn(move || op.update(b"x"))
        };
        entered_rx.recv().expect("entered");
        assert_eq!(
            admit(&db, 1000, true).err(),
            Some(Error::Rc(ResponseCode::BackendBusy))
        );
        release_tx.send(()).expect("release");
        assert!(busy.join().expect("join").is_ok());
        assert!(admit(&db, 1000, true).is_ok());
    }
}
