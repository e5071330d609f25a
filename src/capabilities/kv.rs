//! Key/value storage capability.
//!
//! The shell maps this to whatever persistence the platform has
//! (localStorage in the browser, a file on native). Values are opaque byte
//! blobs; the core serializes what it stores.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOperation {
    Get { key: String },
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOutput {
    /// Response to `Get`; `None` when the key does not exist.
    Value(Option<Vec<u8>>),
    /// Response to `Set` and `Delete`.
    Done,
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvError {
    #[error("storage read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("storage write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("storage unavailable")]
    Unavailable,
}

pub type KvResult = Result<KvOutput, KvError>;

impl Operation for KvOperation {
    type Output = KvResult;
}

pub struct Store<Ev> {
    context: CapabilityContext<KvOperation, Ev>,
}

impl<Ev> Capability<Ev> for Store<Ev> {
    type Operation = KvOperation;
    type MappedSelf<MappedEv> = Store<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Store::new(self.context.map_event(f))
    }
}

impl<Ev> Store<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<KvOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn get<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: Fn(KvResult) -> Ev + Send + Sync + 'static,
    {
        let key = key.into();
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(KvOperation::Get { key }).await;
            context.update_app(make_event(result));
        });
    }

    pub fn set<F>(&self, key: impl Into<String>, value: Vec<u8>, make_event: F)
    where
        F: Fn(KvResult) -> Ev + Send + Sync + 'static,
    {
        let key = key.into();
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(KvOperation::Set { key, value })
                .await;
            context.update_app(make_event(result));
        });
    }

    pub fn delete<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: Fn(KvResult) -> Ev + Send + Sync + 'static,
    {
        let key = key.into();
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(KvOperation::Delete { key })
                .await;
            context.update_app(make_event(result));
        });
    }
}
