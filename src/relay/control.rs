//! Per-session control loop
//!
//! The only place a streaming session ends. It waits for a terminal signal,
//! then closes the fan-out queue, cancels the session scope and marks the
//! restream idle.

use crate::registry::entry::ControlReceiver;
use crate::registry::{ControlSignal, EventLevel, RestreamHandle, Session};

pub(crate) async fn run_control_loop(
    handle: RestreamHandle,
    mut control: ControlReceiver,
    session: Session,
) {
    let reason = loop {
        let signal = tokio::select! {
            signal = control.recv() => signal,
            _ = session.cancel.cancelled() => None,
        };

        match signal {
            Some(ControlSignal::Reload) => {
                // Endpoint changes are applied by the reconciler itself
                tracing::debug!("Control loop woken by reload");
            }
            Some(signal) => break Some(signal),
            None => break None,
        }
    };

    session.queue.close();
    session.cancel.cancel();

    let mut restream = handle.write().await;
    restream.finish_session();
    restream.add_event(EventLevel::Success, "Restream finished.");
    tracing::info!(restream = %restream.id, reason = ?reason, "Restream finished");
}
