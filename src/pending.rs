//! Resumable operations.
//!
//! Key exchange and signature steps may hit a crypto provider that answers
//! [`Async::Pending`](crate::crypto::Async::Pending). The operation then
//! keeps its stage and arguments on the heap and the connection returns to
//! the caller. The next call re-enters at the saved stage, so work that
//! already happened (parsing, random generation, transcript updates) is not
//! repeated.

use std::fmt;

use crate::Error;

/// Progress of a resumable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Stage {
    /// Parse and validate inputs.
    Begin,
    /// Assemble the data to sign or encrypt.
    Build,
    /// Call the provider.
    Do,
    /// Check the provider's answer.
    Verify,
    /// Derive the result.
    Finalize,
    End,
}

/// A resumable operation: its stage and boxed arguments.
pub(crate) struct AsyncOp<A> {
    pub stage: Stage,
    pub args: Box<A>,
}

impl<A> AsyncOp<A> {
    pub fn new(args: A) -> Self {
        AsyncOp {
            stage: Stage::Begin,
            args: Box::new(args),
        }
    }

    /// Move to `stage`. Stages never go backwards.
    pub fn advance(&mut self, stage: Stage) {
        debug_assert!(stage >= self.stage);
        trace!("Async stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::End
    }
}

impl<A> fmt::Debug for AsyncOp<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOp").field("stage", &self.stage).finish()
    }
}

/// Which kind of operation holds the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    /// Decrypting or verifying an incoming record.
    Receive,
    /// Processing a handshake message (key exchange, signatures).
    Handshake,
    /// Protecting an outgoing record.
    Send,
}

/// The single in-flight operation slot of a connection.
#[derive(Debug, Default)]
pub(crate) struct PendingSlot {
    current: Option<OpKind>,
}

impl PendingSlot {
    pub fn get(&self) -> Option<OpKind> {
        self.current
    }

    /// Claim the slot for `kind`. Re-claiming for the same kind resumes;
    /// any other pending kind is a usage error.
    pub fn claim(&mut self, kind: OpKind) -> Result<(), Error> {
        match self.current {
            Some(k) if k != kind => {
                debug!("Operation {:?} while {:?} is pending", kind, k);
                Err(Error::AsyncConflict)
            }
            _ => Ok(()),
        }
    }

    pub fn suspend(&mut self, kind: OpKind) {
        self.current = Some(kind);
    }

    pub fn release(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_only_move_forward() {
        let mut op = AsyncOp::new(5u32);
        assert_eq!(op.stage, Stage::Begin);
        op.advance(Stage::Do);
        op.advance(Stage::End);
        assert!(op.is_done());
        assert_eq!(*op.args, 5);
    }

    #[test]
    fn second_kind_conflicts() {
        let mut slot = PendingSlot::default();
        slot.claim(OpKind::Handshake).unwrap();
        slot.suspend(OpKind::Handshake);
        slot.claim(OpKind::Handshake).unwrap();
        assert!(matches!(slot.claim(OpKind::Send), Err(Error::AsyncConflict)));
        slot.release();
        slot.claim(OpKind::Send).unwrap();
    }
}
