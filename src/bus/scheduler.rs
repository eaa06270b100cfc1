//! Periodic transmission task.
//!
//! One task per activated bus. Every tick it walks the send registry and
//! transmits each registration whose cycle-time stride lines up with the
//! tick counter, the way a scheduled gateway keeps periodic traffic on a
//! real bus. The frame copy is taken under the slot lock by `prepare_send`;
//! all device I/O happens outside any lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::BusShared;
use crate::types::Timestamp;

/// Number of ticks between two transmissions of a slot: its cycle-time hint
/// divided by the tick step, rounded to nearest, never below one.
fn stride(interval: Duration, step: Duration) -> u64 {
    let ratio = interval.as_secs_f64() / step.as_secs_f64();
    (ratio.round() as u64).max(1)
}

pub(crate) fn spawn(
    shared: Arc<BusShared>,
    step: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        debug!("periodic sender task started ({step:?} step)");

        let mut ticker = tokio::time::interval(step);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("periodic sender cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let due: Vec<_> = shared
                .send_slots()
                .into_iter()
                .filter(|slot| {
                    slot.registered_id() != 0
                        && tick % stride(slot.interval_hint(), step) == 0
                })
                .collect();

            for slot in due {
                let frame = slot.prepare_send(Timestamp::now());
                trace!("periodic transmit of {:#X} at tick {}", frame.id, tick);
                shared.fan_out(&frame).await;
            }

            tick += 1;
        }

        debug!("periodic sender task ended after {tick} ticks");
    })
}
