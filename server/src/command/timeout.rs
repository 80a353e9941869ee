//! Ring timeouts on the tokio clock

use callcenter_shared::{Expiry, Timer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Schedules ring timeouts as sleeping tasks
///
/// Fired expiries are delivered on a channel so the dispatcher can process
/// them in turn with client requests.
pub struct TokioTimer {
    expiry_tx: mpsc::UnboundedSender<Expiry>,
}

impl TokioTimer {
    /// Create a timer and the receiver its expiries arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        (Self { expiry_tx }, expiry_rx)
    }
}

impl Timer for TokioTimer {
    type Handle = JoinHandle<()>;

    fn schedule(&mut self, delay: Duration, expiry: Expiry) -> JoinHandle<()> {
        let expiry_tx = self.expiry_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            debug!(
                "Ring timeout elapsed for call {} on operator {}",
                expiry.call_id, expiry.operator_id
            );
            let _ = expiry_tx.send(expiry);
        })
    }

    fn cancel(&mut self, handle: JoinHandle<()>) {
        handle.abort();
    }
}
