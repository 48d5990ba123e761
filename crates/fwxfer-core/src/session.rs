//! Transfer session: high-level orchestrator for one update attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::error::{TransferError, XferError};
use crate::events::{PacketDirection, TracingObserver, TransferEvent, TransferObserver};
use crate::policy::TransferPolicy;
use crate::protocol::{CommandEngine, DeviceClass, DeviceIdentity};
use crate::state::handlers::{
    HandlerContext, TransferReport, handle_commit, handle_erase, handle_validate, handle_verify,
    handle_write,
};
use crate::state::machine::TransferState;
use crate::transport::{Transport, TransportError};

/// Leading bytes of each frame carried by packet events.
const PACKET_HEAD_LEN: usize = 32;

/// Orchestrates a complete transfer against one device class.
pub struct TransferSession<O: TransferObserver> {
    class: DeviceClass,
    policy: TransferPolicy,
    observer: Arc<O>,
}

impl TransferSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(class: DeviceClass, policy: TransferPolicy) -> Self {
        Self::with_observer(class, policy, Arc::new(TracingObserver))
    }
}

impl<O: TransferObserver> TransferSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(class: DeviceClass, policy: TransferPolicy, observer: Arc<O>) -> Self {
        Self {
            class,
            policy,
            observer,
        }
    }

    pub fn class(&self) -> &DeviceClass {
        &self.class
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// Run the complete transfer of `blob` over `transport`.
    ///
    /// The session is the only user of the transport until this returns.
    /// On failure the device is left as the failing stage left it; nothing
    /// is rolled back.
    #[instrument(
        skip_all,
        fields(class = %self.class, len = blob.len(), channel = %transport.describe())
    )]
    pub fn run<T: Transport + ?Sized>(
        &self,
        blob: &[u8],
        transport: &mut T,
    ) -> Result<TransferReport, TransferError> {
        let observer = self.observer.as_ref();
        let mut channel = ObservableTransport {
            inner: transport,
            observer,
        };
        let engine = CommandEngine::from_policy(&mut channel, &self.class, &self.policy);
        let mut ctx = HandlerContext::new(engine, &self.class, observer, blob, self.policy.clone());

        match drive(&mut ctx) {
            Ok(()) => {
                ctx.report.final_state = ctx.machine.state;
                info!(
                    chunks = ctx.report.chunks_written,
                    bytes = ctx.report.bytes_written,
                    "Transfer finished"
                );
                observer.on_event(&TransferEvent::Complete);
                Ok(ctx.report)
            }
            Err(e) => {
                let from = ctx.machine.state;
                ctx.machine.fail();
                observer.on_event(&TransferEvent::StateChanged {
                    from,
                    to: TransferState::Failed,
                });
                observer.on_event(&TransferEvent::Failed {
                    state: e.state,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Read the device identity without transferring anything.
    #[instrument(skip_all, fields(class = %self.class))]
    pub fn identify<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> Result<DeviceIdentity, XferError> {
        let mut channel = ObservableTransport {
            inner: transport,
            observer: self.observer.as_ref(),
        };
        let mut engine = CommandEngine::from_policy(&mut channel, &self.class, &self.policy);
        let identity = engine.identify()?;
        self.observer.on_event(&TransferEvent::Identified {
            identity: identity.clone(),
        });
        Ok(identity)
    }
}

fn drive<T: Transport + ?Sized, O: TransferObserver + ?Sized>(
    ctx: &mut HandlerContext<'_, '_, T, O>,
) -> Result<(), TransferError> {
    while let Some(next) = ctx.machine.next_stage() {
        let from = ctx.machine.state;
        ctx.machine
            .goto_state(next)
            .map_err(|e| e.at(from, "transition"))?;
        ctx.emit(TransferEvent::StateChanged { from, to: next });

        match next {
            TransferState::Validating => handle_validate(ctx)?,
            TransferState::Erasing => handle_erase(ctx)?,
            TransferState::Writing => handle_write(ctx)?,
            TransferState::Verifying => handle_verify(ctx)?,
            TransferState::Committing => handle_commit(ctx)?,
            TransferState::Idle | TransferState::Done | TransferState::Failed => {}
        }
    }
    Ok(())
}

/// Run a transfer with the default tracing observer.
pub fn run_transfer<T: Transport + ?Sized>(
    blob: &[u8],
    channel: &mut T,
    class: &DeviceClass,
    policy: &TransferPolicy,
) -> Result<TransferReport, TransferError> {
    TransferSession::new(class.clone(), policy.clone()).run(blob, channel)
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<'a, T: Transport + ?Sized, O: TransferObserver + ?Sized> {
    inner: &'a mut T,
    observer: &'a O,
}

impl<T: Transport + ?Sized, O: TransferObserver + ?Sized> ObservableTransport<'_, T, O> {
    fn packet(&self, direction: PacketDirection, data: &[u8]) {
        self.observer.on_event(&TransferEvent::Packet {
            direction,
            length: data.len(),
            head: data.iter().take(PACKET_HEAD_LEN).copied().collect(),
        });
    }
}

impl<T, O> Transport for ObservableTransport<'_, T, O>
where
    T: Transport + ?Sized,
    O: TransferObserver + ?Sized,
{
    fn transact(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.packet(PacketDirection::Tx, request);
        let res = self.inner.transact(request, expected_reply_len, timeout);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.packet(PacketDirection::Rx, data);
        }
        res
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
