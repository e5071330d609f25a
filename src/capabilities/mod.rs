//! Capability set wired into the Crux effect system.
//!
//! The built-in Render capability is used directly; backend HTTP, key/value
//! storage and the Telegram host bridge are custom, with their operations
//! kept serializable so every shell speaks the same protocol. The effect
//! enum and its wiring are written out by hand so each variant carries the
//! concrete request type the shell resolves.

mod host;
mod http;
mod kv;

pub use self::host::{HapticStyle, Host, HostOperation, HostOutput, InvoiceStatus};
pub use self::http::{
    is_retryable, Backend, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransportError,
    RetryPolicy, BASE_RETRY_DELAY_MS, MAX_RETRY_ATTEMPTS, MAX_RETRY_DELAY_MS,
};
pub use self::kv::{KvError, KvOperation, KvOutput, KvResult, Store};

pub use crux_core::render::Render;

use crux_core::capability::ProtoContext;
use crux_core::render::RenderOperation;
use crux_core::Request;

use crate::Event;

pub enum Effect {
    Render(Request<RenderOperation>),
    Backend(Request<HttpRequest>),
    Storage(Request<KvOperation>),
    Host(Request<HostOperation>),
}

pub struct Capabilities {
    pub render: Render<Event>,
    pub backend: Backend<Event>,
    pub storage: Store<Event>,
    pub host: Host<Event>,
}

impl crux_core::WithContext<crate::app::App, Effect> for Capabilities {
    fn new_with_context(context: ProtoContext<Effect, Event>) -> Self {
        Self {
            render: Render::new(context.specialize(Effect::Render)),
            backend: Backend::new(context.specialize(Effect::Backend)),
            storage: Store::new(context.specialize(Effect::Storage)),
            host: Host::new(context.specialize(Effect::Host)),
        }
    }
}
