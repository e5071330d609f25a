//! Telegram host bridge.
//!
//! Everything the Mini App asks of the surrounding Telegram runtime goes
//! through this capability: haptic feedback, the Stars invoice sheet,
//! opening external links and composing inline shares.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HapticStyle {
    Light,
    Medium,
    Heavy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostOperation {
    HapticImpact { style: HapticStyle },
    OpenInvoice { url: String },
    OpenLink { url: String },
    ShareInline { text: String },
}

/// How the invoice sheet was dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Paid,
    Cancelled,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostOutput {
    Done,
    Invoice { status: InvoiceStatus },
}

impl Operation for HostOperation {
    type Output = HostOutput;
}

pub struct Host<Ev> {
    context: CapabilityContext<HostOperation, Ev>,
}

impl<Ev> Capability<Ev> for Host<Ev> {
    type Operation = HostOperation;
    type MappedSelf<MappedEv> = Host<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Host::new(self.context.map_event(f))
    }
}

impl<Ev> Host<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<HostOperation, Ev>) -> Self {
        Self { context }
    }

    /// Fire-and-forget haptic tap.
    pub fn haptic(&self, style: HapticStyle) {
        let context = self.context.clone();
        self.context.spawn(async move {
            let _ = context
                .request_from_shell(HostOperation::HapticImpact { style })
                .await;
        });
    }

    pub fn open_link(&self, url: String) {
        let context = self.context.clone();
        self.context.spawn(async move {
            let _ = context
                .request_from_shell(HostOperation::OpenLink { url })
                .await;
        });
    }

    pub fn share(&self, text: String) {
        let context = self.context.clone();
        self.context.spawn(async move {
            let _ = context
                .request_from_shell(HostOperation::ShareInline { text })
                .await;
        });
    }

    /// Opens the Stars invoice sheet and reports how it closed.
    pub fn open_invoice<F>(&self, url: String, make_event: F)
    where
        F: Fn(InvoiceStatus) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let output = context
                .request_from_shell(HostOperation::OpenInvoice { url })
                .await;
            let status = match output {
                HostOutput::Invoice { status } => status,
                HostOutput::Done => InvoiceStatus::Failed,
            };
            context.update_app(make_event(status));
        });
    }
}
